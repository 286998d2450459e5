//! Terminal output helpers
//!
//! Styled output with `console` on a terminal, plain bracketed tags when
//! piped or running in CI.

mod context;
mod output;

pub use context::UiContext;
pub use output::{
    key_value, remark, section, step_error_detail, step_ok, step_ok_detail, step_warn_hint,
};
