//! Ambient HTTP observability middleware, carried from the teacher
//! regardless of the spec's feature Non-goals (logging is ambient stack,
//! not a scoped feature). The teacher's rate-limiting middleware is
//! dropped — not part of this spec's surface.

pub mod logging;

pub use logging::request_logging_simple;
