pub mod envelope;
pub mod router;
pub mod schema;

pub use envelope::{
    normalize_response, to_request_envelope, to_wire_line, EventEnvelope, RequestEnvelope,
    ResponseEnvelope, WorkerReply,
};
pub use router::{command_owner, known_commands, validate_request_envelope, WorkerKind};
pub use schema::{command_spec, CommandSpec, FieldKind, FieldSpec};
