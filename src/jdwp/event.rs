//! Decoding of `Event.Composite` packets.

use super::packet::{CommandPacket, IdSizes, PacketReader};
use super::{JdwpError, Location, ObjectId, ReferenceTypeId, RequestId, ThreadId};

pub const EVENT_COMMAND_SET: u8 = 64;
pub const COMPOSITE_COMMAND: u8 = 100;

/// Event kinds used in both event requests and composite events.
pub mod kind {
    pub const SINGLE_STEP: u8 = 1;
    pub const BREAKPOINT: u8 = 2;
    pub const EXCEPTION: u8 = 4;
    pub const THREAD_START: u8 = 6;
    pub const THREAD_DEATH: u8 = 7;
    pub const CLASS_PREPARE: u8 = 8;
    pub const CLASS_UNLOAD: u8 = 9;
    pub const METHOD_ENTRY: u8 = 40;
    pub const METHOD_EXIT: u8 = 41;
    pub const VM_START: u8 = 90;
    pub const VM_DEATH: u8 = 99;
}

/// Suspend policies for event requests.
pub mod suspend {
    pub const NONE: u8 = 0;
    pub const EVENT_THREAD: u8 = 1;
    pub const ALL: u8 = 2;
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    VmStart {
        request_id: RequestId,
        thread: ThreadId,
    },
    VmDeath {
        request_id: RequestId,
    },
    SingleStep {
        request_id: RequestId,
        thread: ThreadId,
        location: Location,
    },
    Breakpoint {
        request_id: RequestId,
        thread: ThreadId,
        location: Location,
    },
    MethodEntry {
        request_id: RequestId,
        thread: ThreadId,
        location: Location,
    },
    MethodExit {
        request_id: RequestId,
        thread: ThreadId,
        location: Location,
    },
    Exception {
        request_id: RequestId,
        thread: ThreadId,
        location: Location,
        exception: ObjectId,
        catch_location: Location,
    },
    ThreadStart {
        request_id: RequestId,
        thread: ThreadId,
    },
    ThreadDeath {
        request_id: RequestId,
        thread: ThreadId,
    },
    ClassPrepare {
        request_id: RequestId,
        thread: ThreadId,
        type_tag: u8,
        type_id: ReferenceTypeId,
        signature: String,
        status: i32,
    },
    ClassUnload {
        request_id: RequestId,
        signature: String,
    },
}

/// All events delivered by one composite packet, under a single suspend policy.
#[derive(Debug, Clone, PartialEq)]
pub struct EventSet {
    pub suspend_policy: u8,
    pub events: Vec<Event>,
}

impl EventSet {
    pub fn decode(packet: &CommandPacket, sizes: IdSizes) -> Result<Self, JdwpError> {
        if packet.command_set != EVENT_COMMAND_SET || packet.command != COMPOSITE_COMMAND {
            return Err(JdwpError::Malformed(format!(
                "expected composite event, got command {}.{}",
                packet.command_set, packet.command
            )));
        }

        let mut r = PacketReader::new(&packet.data, sizes);
        let suspend_policy = r.u8()?;
        let count = r.list_len()?;
        let mut events = Vec::with_capacity(count);
        for _ in 0..count {
            events.push(decode_event(&mut r)?);
        }
        Ok(Self {
            suspend_policy,
            events,
        })
    }

    /// True when the VM stopped and needs a resume after this set is handled.
    pub fn suspends(&self) -> bool {
        self.suspend_policy != suspend::NONE
    }
}

fn decode_event(r: &mut PacketReader<'_>) -> Result<Event, JdwpError> {
    let event_kind = r.u8()?;
    let request_id = r.i32()?;

    let event = match event_kind {
        kind::VM_START => Event::VmStart {
            request_id,
            thread: r.object_id()?,
        },
        kind::VM_DEATH => Event::VmDeath { request_id },
        kind::SINGLE_STEP => Event::SingleStep {
            request_id,
            thread: r.object_id()?,
            location: r.location()?,
        },
        kind::BREAKPOINT => Event::Breakpoint {
            request_id,
            thread: r.object_id()?,
            location: r.location()?,
        },
        kind::METHOD_ENTRY => Event::MethodEntry {
            request_id,
            thread: r.object_id()?,
            location: r.location()?,
        },
        kind::METHOD_EXIT => Event::MethodExit {
            request_id,
            thread: r.object_id()?,
            location: r.location()?,
        },
        kind::EXCEPTION => {
            let thread = r.object_id()?;
            let location = r.location()?;
            let _tag = r.u8()?;
            let exception = r.object_id()?;
            let catch_location = r.location()?;
            Event::Exception {
                request_id,
                thread,
                location,
                exception,
                catch_location,
            }
        }
        kind::THREAD_START => Event::ThreadStart {
            request_id,
            thread: r.object_id()?,
        },
        kind::THREAD_DEATH => Event::ThreadDeath {
            request_id,
            thread: r.object_id()?,
        },
        kind::CLASS_PREPARE => Event::ClassPrepare {
            request_id,
            thread: r.object_id()?,
            type_tag: r.u8()?,
            type_id: r.reference_type_id()?,
            signature: r.string()?,
            status: r.i32()?,
        },
        kind::CLASS_UNLOAD => Event::ClassUnload {
            request_id,
            signature: r.string()?,
        },
        other => {
            // Events are variable-length, so an unknown kind poisons the rest of the packet.
            return Err(JdwpError::Malformed(format!("unsupported event kind {other}")));
        }
    };
    Ok(event)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jdwp::packet::PacketWriter;

    fn composite(data: Vec<u8>) -> CommandPacket {
        CommandPacket {
            id: 1,
            command_set: EVENT_COMMAND_SET,
            command: COMPOSITE_COMMAND,
            data,
        }
    }

    #[test]
    fn test_decode_class_prepare_and_breakpoint() {
        let sizes = IdSizes::default();
        let loc = Location {
            type_tag: 1,
            class: 10,
            method: 20,
            index: 4,
        };
        let data = PacketWriter::new(sizes)
            .u8(suspend::ALL)
            .i32(2)
            .u8(kind::CLASS_PREPARE)
            .i32(5)
            .object_id(1)
            .u8(1)
            .reference_type_id(10)
            .string("Lbank/BankTest;")
            .i32(7)
            .u8(kind::BREAKPOINT)
            .i32(6)
            .object_id(1)
            .location(&loc)
            .finish();

        let set = EventSet::decode(&composite(data), sizes).unwrap();
        assert!(set.suspends());
        assert_eq!(set.events.len(), 2);
        assert_eq!(
            set.events[0],
            Event::ClassPrepare {
                request_id: 5,
                thread: 1,
                type_tag: 1,
                type_id: 10,
                signature: "Lbank/BankTest;".to_string(),
                status: 7,
            }
        );
        assert_eq!(
            set.events[1],
            Event::Breakpoint {
                request_id: 6,
                thread: 1,
                location: loc,
            }
        );
    }

    #[test]
    fn test_decode_vm_death() {
        let sizes = IdSizes::default();
        let data = PacketWriter::new(sizes)
            .u8(suspend::NONE)
            .i32(1)
            .u8(kind::VM_DEATH)
            .i32(0)
            .finish();
        let set = EventSet::decode(&composite(data), sizes).unwrap();
        assert!(!set.suspends());
        assert_eq!(set.events, vec![Event::VmDeath { request_id: 0 }]);
    }

    #[test]
    fn test_rejects_non_event_command() {
        let packet = CommandPacket {
            id: 1,
            command_set: 1,
            command: 1,
            data: vec![],
        };
        assert!(EventSet::decode(&packet, IdSizes::default()).is_err());
    }

    #[test]
    fn test_rejects_unknown_event_kind() {
        let sizes = IdSizes::default();
        let data = PacketWriter::new(sizes)
            .u8(suspend::ALL)
            .i32(1)
            .u8(77)
            .i32(0)
            .finish();
        assert!(matches!(
            EventSet::decode(&composite(data), sizes),
            Err(JdwpError::Malformed(_))
        ));
    }

    #[test]
    fn test_oversized_event_count_is_malformed() {
        let data = vec![suspend::ALL, 0x7f, 0xff, 0xff, 0xff];
        assert!(matches!(
            EventSet::decode(&composite(data), IdSizes::default()),
            Err(JdwpError::Malformed(_))
        ));
    }
}
