//! Best-effort human rendering of carried values.
//!
//! Every payload type a value container carries implements `Render`.
//! Arithmetic types render their digits, sequences render as `[ a, b ]`,
//! empty options and dangling weak pointers render as `"None"`, and
//! durations render their integer count. Domain enums implement `Render`
//! directly with a match.

use std::sync::{Arc, Weak};

use chrono::TimeDelta;

/// Human rendering for a carried value.
pub trait Render {
    /// The string representation of the value.
    fn render(&self) -> String;
}

macro_rules! render_with_to_string {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl Render for $ty {
                fn render(&self) -> String {
                    self.to_string()
                }
            }
        )+
    };
}

render_with_to_string!(
    i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize, f32, f64, bool, char,
);

impl Render for String {
    fn render(&self) -> String {
        self.clone()
    }
}

impl Render for &'static str {
    fn render(&self) -> String {
        (*self).to_string()
    }
}

impl Render for () {
    fn render(&self) -> String {
        String::new()
    }
}

impl<T: Render> Render for Vec<T> {
    fn render(&self) -> String {
        if self.is_empty() {
            return "[]".to_string();
        }
        let items: Vec<String> = self.iter().map(Render::render).collect();
        format!("[ {} ]", items.join(", "))
    }
}

impl<T: Render> Render for Option<T> {
    fn render(&self) -> String {
        match self {
            Some(value) => value.render(),
            None => "None".to_string(),
        }
    }
}

impl<T: Render> Render for Box<T> {
    fn render(&self) -> String {
        self.as_ref().render()
    }
}

impl<T: Render> Render for Arc<T> {
    fn render(&self) -> String {
        self.as_ref().render()
    }
}

impl<T: Render> Render for Weak<T> {
    fn render(&self) -> String {
        match self.upgrade() {
            Some(value) => value.render(),
            None => "None".to_string(),
        }
    }
}

impl Render for TimeDelta {
    fn render(&self) -> String {
        match self.num_nanoseconds() {
            Some(nanos) => nanos.to_string(),
            None => self.num_milliseconds().to_string(),
        }
    }
}
