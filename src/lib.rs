//! Form-builder backend.
//!
//! ## Overview
//!
//! A thin REST layer over a two-table SQLite schema: users create forms,
//! manage an ordered set of typed fields, optionally regenerate the field
//! set from a natural-language brief via an external structured-generation
//! service, and publish forms to lock them from further edits.
//!
//! ## Module Map
//!
//! | Module   | Responsibility                                              |
//! |----------|-------------------------------------------------------------|
//! | `models` | Shared types: `Form`, `Field`, `FormStatus`, `FieldType`    |
//! | `errors` | `ApiError` taxonomy (NotFound/Conflict/BadRequest/BadGateway)|
//! | `db`     | SQLite access via `DbHandle` (thin `Arc<Mutex<_>>`)         |
//! | `ai`     | `GeneratorClient` + the field-regeneration orchestration    |
//! | `api`    | axum route handlers, request payloads, `AppState`           |
//! | `server` | `ServerConfig`, router assembly, startup/shutdown           |

pub mod ai;
pub mod api;
pub mod db;
pub mod errors;
pub mod models;
pub mod server;
