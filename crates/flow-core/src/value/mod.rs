//! Erased value containers.
//!
//! Values travel through untyped channels behind `Arc<dyn NodeValue>` while
//! preserving an identifying type tag. The carrier set is closed: a value
//! either owns its payload, binds external storage so writes flow through,
//! or holds a move-only payload that can be taken exactly once.

mod render;

pub use render::Render;

use std::any::Any;
use std::marker::PhantomData;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use chrono::TimeDelta;
use parking_lot::{Mutex, RwLock};

use crate::error::panic_message;
use crate::types::type_name::TypeName;

/// Erased interface over a carried value.
pub trait NodeValue: Send + Sync {
    /// The type tag of the payload. Always equals the static type the
    /// container was constructed with.
    fn data_type(&self) -> TypeName;

    /// Best-effort human rendering. Fails soft: a panicking `Render`
    /// implementation yields an `"Error: ..."` string instead of unwinding.
    fn render(&self) -> String;

    /// Downcast support.
    fn as_any(&self) -> &dyn Any;

    /// Assigns this container's payload from another container of the same
    /// payload type. Returns `false` when the types do not match; the
    /// payload is never reinterpreted.
    fn assign_from(&self, other: &dyn NodeValue) -> bool;
}

/// Shared handle to an erased value.
pub type SharedValue = Arc<dyn NodeValue>;

/// A container owning its payload.
pub struct OwnedValue<T> {
    value: RwLock<T>,
}

impl<T> OwnedValue<T> {
    /// Creates a container owning `value`.
    pub fn new(value: T) -> Self {
        Self {
            value: RwLock::new(value),
        }
    }
}

impl<T> NodeValue for OwnedValue<T>
where
    T: Render + Clone + Send + Sync + 'static,
{
    fn data_type(&self) -> TypeName {
        TypeName::of::<T>()
    }

    fn render(&self) -> String {
        render_guarded(&*self.value.read())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn assign_from(&self, other: &dyn NodeValue) -> bool {
        match extract::<T>(other) {
            Some(value) => {
                *self.value.write() = value;
                true
            }
            None => false,
        }
    }
}

/// A container bound to external storage.
///
/// Writes go through to the bound slot, so a producer-side write remains
/// visible to whoever owns the storage. The shared slot guarantees the
/// storage lives at least as long as every container bound to it.
pub struct BoundValue<T> {
    slot: Arc<RwLock<T>>,
}

impl<T> BoundValue<T> {
    /// Binds the given storage slot.
    pub fn new(slot: Arc<RwLock<T>>) -> Self {
        Self { slot }
    }

    /// The bound storage slot.
    pub fn slot(&self) -> &Arc<RwLock<T>> {
        &self.slot
    }
}

impl<T> NodeValue for BoundValue<T>
where
    T: Render + Clone + Send + Sync + 'static,
{
    fn data_type(&self) -> TypeName {
        TypeName::of::<T>()
    }

    fn render(&self) -> String {
        render_guarded(&*self.slot.read())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn assign_from(&self, other: &dyn NodeValue) -> bool {
        match extract::<T>(other) {
            Some(value) => {
                *self.slot.write() = value;
                true
            }
            None => false,
        }
    }
}

/// A container holding a move-only payload.
///
/// The payload may be taken at most once; reads after the move observe an
/// empty container.
pub struct UniqueValue<T> {
    value: Mutex<Option<T>>,
}

impl<T> UniqueValue<T> {
    /// Creates a container holding `value`.
    pub fn new(value: T) -> Self {
        Self {
            value: Mutex::new(Some(value)),
        }
    }
}

impl<T> NodeValue for UniqueValue<T>
where
    T: Render + Send + Sync + 'static,
{
    fn data_type(&self) -> TypeName {
        TypeName::of::<T>()
    }

    fn render(&self) -> String {
        match &*self.value.lock() {
            Some(value) => render_guarded(value),
            None => "None".to_string(),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn assign_from(&self, other: &dyn NodeValue) -> bool {
        let Some(source) = other.as_any().downcast_ref::<UniqueValue<T>>() else {
            return false;
        };
        let taken = source.value.lock().take();
        match taken {
            Some(value) => {
                *self.value.lock() = Some(value);
                true
            }
            None => false,
        }
    }
}

fn render_guarded<T: Render>(value: &T) -> String {
    catch_unwind(AssertUnwindSafe(|| value.render()))
        .unwrap_or_else(|payload| format!("Error: {}", panic_message(payload.as_ref())))
}

/// Clones (or, for unique payloads, steals) a `T` out of an erased value.
fn extract<T: Clone + 'static>(value: &dyn NodeValue) -> Option<T> {
    let any = value.as_any();
    if let Some(owned) = any.downcast_ref::<OwnedValue<T>>() {
        return Some(owned.value.read().clone());
    }
    if let Some(bound) = any.downcast_ref::<BoundValue<T>>() {
        return Some(bound.slot.read().clone());
    }
    if let Some(unique) = any.downcast_ref::<UniqueValue<T>>() {
        return unique.value.lock().take();
    }
    None
}

/// Typed accessor over a shared value whose tag is known to be `T`.
pub struct TypedValue<T> {
    raw: SharedValue,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Send + Sync + 'static> TypedValue<T> {
    /// Reads the current payload by clone. Returns `None` when a unique
    /// payload has already been taken.
    pub fn try_get(&self) -> Option<T>
    where
        T: Clone,
    {
        let any = self.raw.as_any();
        if let Some(owned) = any.downcast_ref::<OwnedValue<T>>() {
            return Some(owned.value.read().clone());
        }
        if let Some(bound) = any.downcast_ref::<BoundValue<T>>() {
            return Some(bound.slot.read().clone());
        }
        if let Some(unique) = any.downcast_ref::<UniqueValue<T>>() {
            return unique.value.lock().clone();
        }
        None
    }

    /// Reads the current payload by clone.
    ///
    /// # Panics
    ///
    /// Panics if a unique payload was already taken; use [`try_get`] when
    /// the payload may have been moved.
    ///
    /// [`try_get`]: TypedValue::try_get
    pub fn get(&self) -> T
    where
        T: Clone,
    {
        self.try_get().expect("value payload was already taken")
    }

    /// Writes the payload. For a bound container the write goes through to
    /// the external storage.
    pub fn set(&self, value: T) {
        let any = self.raw.as_any();
        if let Some(owned) = any.downcast_ref::<OwnedValue<T>>() {
            *owned.value.write() = value;
        } else if let Some(bound) = any.downcast_ref::<BoundValue<T>>() {
            *bound.slot.write() = value;
        } else if let Some(unique) = any.downcast_ref::<UniqueValue<T>>() {
            *unique.value.lock() = Some(value);
        }
    }

    /// Takes a move-only payload out of the container. Returns `None` for
    /// non-unique containers and for payloads already taken.
    pub fn take(&self) -> Option<T> {
        self.raw
            .as_any()
            .downcast_ref::<UniqueValue<T>>()
            .and_then(|unique| unique.value.lock().take())
    }

    /// The erased handle.
    pub fn raw(&self) -> &SharedValue {
        &self.raw
    }

    /// Consumes the accessor, returning the erased handle.
    pub fn into_raw(self) -> SharedValue {
        self.raw
    }
}

/// Downcasts a shared value to a typed accessor.
///
/// Succeeds iff the stored tag is exactly `T`; a mismatched type yields
/// `None`, never an error.
pub fn cast_value<T: Send + Sync + 'static>(value: &SharedValue) -> Option<TypedValue<T>> {
    let any = value.as_ref().as_any();
    let matches = any.is::<OwnedValue<T>>() || any.is::<BoundValue<T>>() || any.is::<UniqueValue<T>>();
    matches.then(|| TypedValue {
        raw: Arc::clone(value),
        _marker: PhantomData,
    })
}

/// Creates an owned shared value.
pub fn make_value<T>(value: T) -> SharedValue
where
    T: Render + Clone + Send + Sync + 'static,
{
    Arc::new(OwnedValue::new(value))
}

/// Creates a shared value bound to external storage.
pub fn make_bound_value<T>(slot: Arc<RwLock<T>>) -> SharedValue
where
    T: Render + Clone + Send + Sync + 'static,
{
    Arc::new(BoundValue::new(slot))
}

/// Creates a shared value holding a move-only payload.
pub fn make_unique_value<T>(value: T) -> SharedValue
where
    T: Render + Send + Sync + 'static,
{
    Arc::new(UniqueValue::new(value))
}

/// Time granularities for duration construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeUnit {
    Nanoseconds,
    Microseconds,
    Milliseconds,
    Seconds,
    Minutes,
    Hours,
    Days,
    Weeks,
    /// Average Gregorian month (2 629 746 seconds).
    Months,
    /// Average Gregorian year (31 556 952 seconds).
    Years,
}

/// Creates a duration value, converting `count` in `unit` to the carried
/// `TimeDelta` granularity at construction.
pub fn make_duration_value(count: i64, unit: TimeUnit) -> SharedValue {
    let delta = match unit {
        TimeUnit::Nanoseconds => TimeDelta::nanoseconds(count),
        TimeUnit::Microseconds => TimeDelta::microseconds(count),
        TimeUnit::Milliseconds => TimeDelta::milliseconds(count),
        TimeUnit::Seconds => TimeDelta::seconds(count),
        TimeUnit::Minutes => TimeDelta::minutes(count),
        TimeUnit::Hours => TimeDelta::hours(count),
        TimeUnit::Days => TimeDelta::days(count),
        TimeUnit::Weeks => TimeDelta::weeks(count),
        TimeUnit::Months => TimeDelta::seconds(count * 2_629_746),
        TimeUnit::Years => TimeDelta::seconds(count * 31_556_952),
    };
    make_value(delta)
}
