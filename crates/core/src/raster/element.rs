//! Cell value types

use num_traits::{NumCast, Zero};
use std::fmt::Debug;

/// Types that can be stored in a raster cell.
///
/// Reflectances, backscatter and test statistics are `f64`; change maps use
/// small unsigned integers (`u8` flags, `u16` time indices).
pub trait RasterElement:
    Copy + Debug + PartialOrd + PartialEq + NumCast + Zero + Send + Sync + 'static
{
    /// Value written where a cell has no data
    fn default_nodata() -> Self;

    /// Whether this value is no-data, given the raster's declared no-data value
    fn is_nodata(&self, nodata: Option<Self>) -> bool;

    /// Convert to f64
    fn to_f64(self) -> Option<f64> {
        NumCast::from(self)
    }
}

macro_rules! impl_integer_element {
    ($($t:ty),*) => {$(
        impl RasterElement for $t {
            fn default_nodata() -> Self {
                <$t>::MAX
            }

            fn is_nodata(&self, nodata: Option<Self>) -> bool {
                nodata == Some(*self)
            }
        }
    )*};
}

macro_rules! impl_float_element {
    ($($t:ty),*) => {$(
        impl RasterElement for $t {
            fn default_nodata() -> Self {
                <$t>::NAN
            }

            fn is_nodata(&self, nodata: Option<Self>) -> bool {
                !self.is_finite() || nodata.is_some_and(|nd| *self == nd)
            }
        }
    )*};
}

impl_integer_element!(u8, u16, u32, i16, i32);
impl_float_element!(f32, f64);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_float_nodata() {
        assert!(f64::NAN.is_nodata(None));
        assert!(f64::INFINITY.is_nodata(None));
        assert!((-9999.0_f64).is_nodata(Some(-9999.0)));
        assert!(!1.0_f64.is_nodata(Some(-9999.0)));
    }

    #[test]
    fn test_integer_nodata() {
        assert!(!0_u16.is_nodata(None));
        assert!(255_u8.is_nodata(Some(255)));
        assert_eq!(<u8 as RasterElement>::default_nodata(), 255);
    }
}
