/// Database Module
///
/// The templating and dispatch engine, split by concern:
/// - **Connection Management** (`connection.rs`): server descriptors, drivers and the registry
/// - **Address Resolution** (`address.rs`): `[serverId:]sqlTemplate` parsing
/// - **Parameter Substitution** (`payload.rs`): payload modes and template filling
/// - **Query Execution** (`query.rs`): select/update/insert and result encoding
///
/// ## Error Handling
///
/// All operations return the crate's `BridgeError`; none of them panic on
/// driver or connection failures.
pub mod address;
pub mod connection;
pub mod payload;
pub mod query;

pub use address::*;
pub use connection::*;
pub use payload::{substitute_insert, substitute_update, unsafe_fill, Payload, Statement};
pub use query::*;
