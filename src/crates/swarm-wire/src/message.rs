//! Message traits, the type registry and the worker response envelope.
//!
//! A message on the wire is its 8-byte type code followed by the body
//! produced by the type's own `write_data`; an absent message is encoded
//! as [`NULL_TYPE_CODE`](crate::typecode::NULL_TYPE_CODE) with no body.
//! Concrete types implement [`MessageData`]; a blanket impl provides the
//! object-safe [`Message`] used by channels and dispatch tables. Decoding
//! goes through a [`MessageRegistry`], an explicit value built once at
//! startup and shared behind an `Arc`; type-code collisions are caught at
//! registration time.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;

use crate::buffer::Buffer;
use crate::error::{Result, WireError};
use crate::typecode::{TypeCode, NULL_TYPE_CODE};

/// A concrete message type: a short unique tag plus body codecs.
///
/// `read_data` mirrors `write_data`; it receives the registry so that
/// messages nesting other messages (such as [`WorkerResponse`]) can decode
/// their payload.
pub trait MessageData: Default + Send + Sync + 'static {
    /// Unique tag, up to 10 characters from `0-9A-Za-z_`.
    const NAME: &'static str;

    /// Writes the body (no type information) to `out`.
    fn write_data(&self, out: &mut Buffer);

    /// Reads the body previously written by `write_data`.
    fn read_data(&mut self, input: &mut Buffer, registry: &MessageRegistry) -> Result<()>;
}

/// Object-safe message surface used by channels and callback tables.
///
/// Implemented for every [`MessageData`] type via the blanket impl; the
/// `Any` supertrait lets receivers downcast to the concrete type they
/// registered for.
pub trait Message: Any + Send + Sync {
    /// The type code of this message's concrete type.
    fn type_code(&self) -> Result<TypeCode>;

    /// Writes the body (no type information) to `out`.
    fn write_data(&self, out: &mut Buffer);
}

impl fmt::Debug for dyn Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("dyn Message").finish_non_exhaustive()
    }
}

impl<T: MessageData> Message for T {
    fn type_code(&self) -> Result<TypeCode> {
        TypeCode::from_name(T::NAME)
    }

    fn write_data(&self, out: &mut Buffer) {
        MessageData::write_data(self, out)
    }
}

/// Writes an optional message with type information: the type code, then
/// the body. `None` writes the null code and no body.
pub fn write_message(out: &mut Buffer, message: Option<&dyn Message>) -> Result<()> {
    match message {
        Some(m) => {
            out.write_u64(m.type_code()?.raw());
            m.write_data(out);
        }
        None => out.write_u64(NULL_TYPE_CODE.raw()),
    }
    Ok(())
}

type Factory = Box<dyn Fn(&mut Buffer, &MessageRegistry) -> Result<Box<dyn Message>> + Send + Sync>;

/// Registry mapping type codes to decoders.
///
/// Built once by the application with every message type the algorithm
/// uses, then shared (immutably) by channels on both ends. Registration
/// fails fast on invalid tags and on code collisions; [`WorkerResponse`]
/// is pre-registered so the response envelope can always be decoded.
pub struct MessageRegistry {
    factories: HashMap<u64, Factory>,
    names: HashMap<u64, &'static str>,
}

impl Default for MessageRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageRegistry {
    /// Creates a registry with [`WorkerResponse`] pre-registered.
    pub fn new() -> Self {
        let mut registry = MessageRegistry {
            factories: HashMap::new(),
            names: HashMap::new(),
        };
        // The tag is statically valid, so this cannot fail.
        let _ = registry.register::<WorkerResponse>();
        registry
    }

    /// Registers `T` under its tag and returns the assigned code.
    pub fn register<T: MessageData>(&mut self) -> Result<TypeCode> {
        let code = TypeCode::from_name(T::NAME)?;
        if code.is_reserved() {
            return Err(WireError::ReservedTypeCode(code.raw()));
        }
        if let Some(existing) = self.names.get(&code.raw()) {
            return Err(WireError::DuplicateTypeCode {
                code: code.raw(),
                name: T::NAME.to_owned(),
                existing: existing.to_string(),
            });
        }
        self.names.insert(code.raw(), T::NAME);
        self.factories.insert(
            code.raw(),
            Box::new(|input, registry| {
                let mut message = T::default();
                message.read_data(input, registry)?;
                Ok(Box::new(message) as Box<dyn Message>)
            }),
        );
        Ok(code)
    }

    /// True when a type is registered under `code`.
    pub fn contains(&self, code: TypeCode) -> bool {
        self.factories.contains_key(&code.raw())
    }

    /// The tag registered for `code`, if any.
    pub fn name_of(&self, code: TypeCode) -> Option<&'static str> {
        self.names.get(&code.raw()).copied()
    }

    /// Reads an optional message with type information from `input`:
    /// the type code, then (unless null) the body via the registered
    /// factory.
    pub fn read_message(&self, input: &mut Buffer) -> Result<Option<Box<dyn Message>>> {
        let raw = input.read_u64()?;
        if raw == NULL_TYPE_CODE.raw() {
            return Ok(None);
        }
        let factory = self
            .factories
            .get(&raw)
            .ok_or(WireError::UnknownTypeCode(raw))?;
        Ok(Some(factory(input, self)?))
    }
}

/// A worker's advisory next-state request, carried in every reply.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum RequestedState {
    /// The worker wants more work.
    Work = 0,
    /// The worker wants to stop; the master decides when.
    Stop = 1,
}

impl RequestedState {
    fn from_wire(v: i32) -> Result<RequestedState> {
        match v {
            0 => Ok(RequestedState::Work),
            1 => Ok(RequestedState::Stop),
            other => Err(WireError::InvalidRequestedState(other)),
        }
    }
}

/// The fixed reply envelope every worker sends after handling a message:
/// the requested state plus an optional result payload.
pub struct WorkerResponse {
    pub requested_state: RequestedState,
    pub payload: Option<Box<dyn Message>>,
}

impl Default for WorkerResponse {
    fn default() -> Self {
        WorkerResponse {
            requested_state: RequestedState::Work,
            payload: None,
        }
    }
}

impl MessageData for WorkerResponse {
    const NAME: &'static str = "WResp";

    fn write_data(&self, out: &mut Buffer) {
        out.write_i32(self.requested_state as i32);
        // A registered payload always carries a valid tag; the null code
        // keeps the frame well-formed otherwise.
        if write_message(out, self.payload.as_deref()).is_err() {
            out.write_u64(NULL_TYPE_CODE.raw());
        }
    }

    fn read_data(&mut self, input: &mut Buffer, registry: &MessageRegistry) -> Result<()> {
        self.requested_state = RequestedState::from_wire(input.read_i32()?)?;
        self.payload = registry.read_message(input)?;
        Ok(())
    }
}
