// src/api/mod.rs
// HTTP and WebSocket entry points. REST CRUD routers (conversations,
// datasets, settings, OAuth login) are out of scope for this core; routers
// that need them call into `auth`, `dataset`, and `orchestrator` directly.

pub mod http;
pub mod ws;
