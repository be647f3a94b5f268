//! Runtime type-conversion registry.
//!
//! A two-level table mapping source type names to destination type names to
//! conversion functions. Unregistered pairs pass the value through
//! unchanged (the downstream downcast then fails); a registered converter
//! that produces nothing is a hard conversion error.

use std::collections::HashMap;
use std::sync::Arc;

use num_traits::NumCast;
use parking_lot::RwLock;

use crate::error::FlowError;
use crate::types::type_name::{normalize_type_name, TypeName, ANY_TYPE};
use crate::value::{cast_value, make_value, Render, SharedValue};

/// A registered conversion between two type names.
///
/// Returning `None` signals that the conversion failed for this value.
pub type ConvertFn = Arc<dyn Fn(&SharedValue) -> Option<SharedValue> + Send + Sync>;

type ConversionTable = HashMap<String, HashMap<String, ConvertFn>>;

/// Registry of runtime coercions between value types.
#[derive(Default)]
pub struct ConversionRegistry {
    table: RwLock<ConversionTable>,
}

impl ConversionRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a one-way conversion from `F` to `T`.
    pub fn register_unidirectional<F, T>(
        &self,
        convert: impl Fn(&F) -> Option<T> + Send + Sync + 'static,
    ) where
        F: Render + Clone + Send + Sync + 'static,
        T: Render + Clone + Send + Sync + 'static,
    {
        let func: ConvertFn = Arc::new(move |value| {
            let input = cast_value::<F>(value)?.try_get()?;
            convert(&input).map(make_value)
        });
        self.register_raw(TypeName::of::<F>(), TypeName::of::<T>(), func);
    }

    /// Registers conversions in both directions between `F` and `T`.
    pub fn register_bidirectional<F, T>(
        &self,
        forward: impl Fn(&F) -> Option<T> + Send + Sync + 'static,
        backward: impl Fn(&T) -> Option<F> + Send + Sync + 'static,
    ) where
        F: Render + Clone + Send + Sync + 'static,
        T: Render + Clone + Send + Sync + 'static,
    {
        self.register_unidirectional::<F, T>(forward);
        self.register_unidirectional::<T, F>(backward);
    }

    /// Registers the default numeric conversion from `F` to `T`.
    ///
    /// Same-type pairs are skipped. Casts that cannot represent the value
    /// (overflowing narrowing, NaN to integer) fail the conversion instead
    /// of wrapping.
    pub fn register_numeric<F, T>(&self)
    where
        F: NumCast + Render + Clone + Send + Sync + 'static,
        T: NumCast + Render + Clone + Send + Sync + 'static,
    {
        if TypeName::of::<F>() == TypeName::of::<T>() {
            return;
        }
        self.register_unidirectional::<F, T>(|value| num_traits::cast::<F, T>(value.clone()));
    }

    /// Registers a pre-erased conversion function.
    pub fn register_raw(&self, from: TypeName, to: TypeName, func: ConvertFn) {
        self.table
            .write()
            .entry(from.base_name().to_string())
            .or_default()
            .insert(to.base_name().to_string(), func);
    }

    /// Coerces `value` to the requested destination type name.
    ///
    /// The value passes through unchanged when the names match after
    /// normalization, when the destination is the universal tag, or when no
    /// conversion is registered. A registered converter that fails yields a
    /// conversion error.
    pub fn convert(&self, value: &SharedValue, to_type: &str) -> Result<SharedValue, FlowError> {
        let from_type = value.data_type();
        let from = from_type.base_name();
        let to = normalize_type_name(to_type);

        if from == to || to == ANY_TYPE {
            return Ok(Arc::clone(value));
        }

        let func = {
            let table = self.table.read();
            table.get(from).and_then(|row| row.get(to)).cloned()
        };

        match func {
            None => Ok(Arc::clone(value)),
            Some(func) => func(value).ok_or_else(|| FlowError::Conversion {
                from: from.to_string(),
                to: to.to_string(),
            }),
        }
    }

    /// Whether a value of `from_type` can be coerced to `to_type`.
    pub fn is_convertible(&self, from_type: &str, to_type: &str) -> bool {
        let from = normalize_type_name(from_type);
        let to = normalize_type_name(to_type);

        if from == to || to == ANY_TYPE {
            return true;
        }

        self.table
            .read()
            .get(from)
            .is_some_and(|row| row.contains_key(to))
    }
}

/// Registers every ordered pair of the listed types with the default
/// numeric converter. The list must be written twice, once per axis:
///
/// ```
/// use flow_core::{register_complete_conversion, ConversionRegistry};
///
/// let registry = ConversionRegistry::new();
/// register_complete_conversion!(registry, [u8, u16, u32], [u8, u16, u32]);
/// assert!(registry.is_convertible("u8", "u32"));
/// ```
#[macro_export]
macro_rules! register_complete_conversion {
    ($registry:expr, [$($from:ty),+ $(,)?], $to:tt) => {
        $( $crate::register_complete_conversion!(@row $registry, $from, $to); )+
    };
    (@row $registry:expr, $from:ty, [$($to:ty),+ $(,)?]) => {
        $( $registry.register_numeric::<$from, $to>(); )+
    };
}

/// Registers the complete numeric family: every ordered pair of the
/// primitive integer and floating types interconverts.
pub fn register_numeric_conversions(registry: &ConversionRegistry) {
    register_complete_conversion!(
        registry,
        [i8, i16, i32, i64, i128, u8, u16, u32, u64, u128, f32, f64],
        [i8, i16, i32, i64, i128, u8, u16, u32, u64, u128, f32, f64]
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::TypedValue;

    fn registry() -> ConversionRegistry {
        let registry = ConversionRegistry::new();
        register_numeric_conversions(&registry);
        registry
    }

    fn get<T: Clone + Send + Sync + 'static>(value: &SharedValue) -> T {
        cast_value::<T>(value)
            .as_ref()
            .and_then(TypedValue::try_get)
            .unwrap()
    }

    #[test]
    fn test_same_type_passes_through() {
        let registry = registry();
        let value = make_value(5i32);
        let converted = registry.convert(&value, "i32").unwrap();
        assert!(Arc::ptr_eq(&value, &converted));
    }

    #[test]
    fn test_universal_tag_passes_through() {
        let registry = ConversionRegistry::new();
        let value = make_value("text".to_string());
        let converted = registry.convert(&value, ANY_TYPE).unwrap();
        assert!(Arc::ptr_eq(&value, &converted));
    }

    #[test]
    fn test_numeric_widening() {
        let registry = registry();
        let converted = registry.convert(&make_value(7i32), "f64").unwrap();
        assert_eq!(get::<f64>(&converted), 7.0);
    }

    #[test]
    fn test_numeric_narrowing_in_range() {
        let registry = registry();
        let converted = registry.convert(&make_value(100i64), "i8").unwrap();
        assert_eq!(get::<i8>(&converted), 100);
    }

    #[test]
    fn test_numeric_narrowing_out_of_range_fails() {
        let registry = registry();
        let result = registry.convert(&make_value(300i64), "i8");
        assert!(matches!(result, Err(FlowError::Conversion { .. })));
    }

    #[test]
    fn test_unregistered_pair_passes_through() {
        let registry = registry();
        let value = make_value("text".to_string());
        let converted = registry.convert(&value, "i32").unwrap();
        assert!(Arc::ptr_eq(&value, &converted));
        assert!(cast_value::<i32>(&converted).is_none());
    }

    #[test]
    fn test_is_convertible() {
        let registry = registry();
        assert!(registry.is_convertible("i32", "i32"));
        assert!(registry.is_convertible("i32", "f64"));
        assert!(registry.is_convertible("u8", ANY_TYPE));
        assert!(!registry.is_convertible("alloc::string::String", "i32"));
    }

    #[test]
    fn test_reference_names_normalize() {
        let registry = registry();
        assert!(registry.is_convertible("&i32", "f64"));
        assert!(registry.is_convertible("i32", "&mut f64"));
    }

    #[test]
    fn test_custom_conversion() {
        let registry = ConversionRegistry::new();
        registry.register_unidirectional::<String, usize>(|text| Some(text.len()));

        let converted = registry
            .convert(&make_value("four".to_string()), "usize")
            .unwrap();
        assert_eq!(get::<usize>(&converted), 4);
    }

    #[test]
    fn test_bidirectional_conversion() {
        let registry = ConversionRegistry::new();
        registry.register_bidirectional::<i64, String>(
            |n| Some(n.to_string()),
            |s| s.parse().ok(),
        );

        let text = registry.convert(&make_value(12i64), "alloc::string::String");
        assert_eq!(get::<String>(&text.unwrap()), "12");

        let back = registry.convert(&make_value("9".to_string()), "i64");
        assert_eq!(get::<i64>(&back.unwrap()), 9);
    }
}
