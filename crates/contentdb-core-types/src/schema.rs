//! Canonical schema constants for structured logging
//!
//! Every `tracing` event emitted by the store and the transaction pipeline
//! uses these keys, so log consumers and the test capture layer can rely on
//! a single vocabulary.

// Canonical field keys for structured logging
pub const FIELD_COMPONENT: &str = "component";
pub const FIELD_OP: &str = "op";
pub const FIELD_EVENT: &str = "event";
pub const FIELD_DURATION_MS: &str = "duration_ms";
pub const FIELD_REQUEST_ID: &str = "request_id";
pub const FIELD_TRACE_ID: &str = "trace_id";

// Entity identifiers
pub const FIELD_ENTITY_ID: &str = "entity_id";
pub const FIELD_ENTITY_KIND: &str = "entity_kind";
pub const FIELD_VIEW_ID: &str = "view_id";

// Transaction fields
pub const FIELD_ACTION: &str = "action";
pub const FIELD_ERROR_COUNT: &str = "error_count";

// Collection sizes
pub const FIELD_MEMBER_COUNT: &str = "member_count";

// Error fields
pub const FIELD_ERR_KIND: &str = "err_kind";
pub const FIELD_ERR_CODE: &str = "err_code";

// Canonical event names
pub const EVENT_START: &str = "start";
pub const EVENT_END: &str = "end";
pub const EVENT_END_ERROR: &str = "end_error";
