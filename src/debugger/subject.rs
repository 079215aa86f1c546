use super::{InspectorCandidate, ProgramPoint, RuntimeType, Subject};
use crate::jdwp::vm::FieldInfo;
use crate::jdwp::{tag, JdwpError, ObjectId, ReferenceTypeId, Value, Vm};
use std::collections::HashSet;

impl Vm {
    /// Instance fields of `object` found on `types`, most derived first, filtered by `keep`.
    fn instance_fields(
        &mut self,
        object: ObjectId,
        types: &[ReferenceTypeId],
        keep: impl Fn(&FieldInfo) -> bool,
    ) -> Result<Vec<(String, Value)>, JdwpError> {
        let mut seen = HashSet::new();
        let mut selected = Vec::new();
        for ty in types {
            for field in self.fields(*ty)? {
                if field.is_static() || !keep(&field) || !seen.insert(field.name.clone()) {
                    continue;
                }
                selected.push(field);
            }
        }
        if selected.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<_> = selected.iter().map(|f| f.id).collect();
        let values = self.object_field_values(object, &ids)?;
        Ok(selected.into_iter().map(|f| f.name).zip(values).collect())
    }
}

impl Subject for Vm {
    fn visible_variables(&mut self, point: &ProgramPoint) -> Result<Vec<(String, Value)>, JdwpError> {
        let vars = self.variable_table(point.location.class, point.location.method)?;
        let visible: Vec<_> = vars
            .into_iter()
            .filter(|v| v.name != "this" && v.is_visible_at(point.location.index))
            .collect();
        if visible.is_empty() {
            return Ok(Vec::new());
        }

        let slots: Vec<(i32, u8)> = visible
            .iter()
            .map(|v| {
                let sig = v.signature.as_bytes().first().copied().unwrap_or(tag::OBJECT);
                (v.slot, sig)
            })
            .collect();
        let values = self.frame_values(point.thread, point.frame, &slots)?;
        Ok(visible.into_iter().map(|v| v.name).zip(values).collect())
    }

    fn fixture_fields(&mut self, point: &ProgramPoint) -> Result<Vec<(String, Value)>, JdwpError> {
        let Some(this) = self.this_object(point.thread, point.frame)? else {
            return Ok(Vec::new());
        };
        let ty = self.object_type(this)?;
        self.instance_fields(this, &[ty], |f| !f.is_synthetic())
    }

    fn runtime_type(&mut self, object: ObjectId) -> Result<RuntimeType, JdwpError> {
        let id = self.object_type(object)?;
        Ok(RuntimeType {
            id,
            name: self.type_name(id)?,
        })
    }

    fn inspector_candidates(&mut self, ty: &RuntimeType) -> Result<Vec<InspectorCandidate>, JdwpError> {
        let mut seen = HashSet::new();
        let mut candidates = Vec::new();
        for class in self.class_chain(ty.id)? {
            let declaring_name = self.type_name(class)?;
            for method in self.methods(class)? {
                // An override hides the superclass declaration.
                if !method.is_nullary_getter() || !seen.insert((method.name.clone(), method.signature.clone())) {
                    continue;
                }
                candidates.push(InspectorCandidate {
                    declaring_type: class,
                    declaring_name: declaring_name.clone(),
                    method: method.id,
                    name: method.name,
                });
            }
        }
        Ok(candidates)
    }

    fn public_fields(
        &mut self,
        object: ObjectId,
        ty: &RuntimeType,
    ) -> Result<Vec<(String, Value)>, JdwpError> {
        let chain = self.class_chain(ty.id)?;
        self.instance_fields(object, &chain, |f| f.is_public() && !f.is_synthetic())
    }

    fn invoke(
        &mut self,
        point: &ProgramPoint,
        object: ObjectId,
        method: &InspectorCandidate,
    ) -> Result<Value, JdwpError> {
        self.invoke_method(object, point.thread, method.declaring_type, method.method)
    }

    fn string_value(&mut self, object: ObjectId) -> Result<String, JdwpError> {
        Vm::string_value(self, object)
    }

    fn array_elements(&mut self, array: ObjectId) -> Result<Vec<Value>, JdwpError> {
        self.array_values(array)
    }
}
