/*!
 * Monitoring
 * Structured tracing for socket operations
 */

mod tracer;

pub use tracer::{init_tracing, span_operation, OperationSpan};
