//! Float operations that are not available in `core`, backed by `libm` when
//! building without `std`.

#[cfg(feature = "std")]
pub(crate) trait FloatPolyfill {}

#[cfg(feature = "std")]
impl FloatPolyfill for f64 {}

#[cfg(not(feature = "std"))]
pub(crate) trait FloatPolyfill {
    fn abs(self) -> Self;
    fn powi(self, n: i32) -> Self;
    fn sqrt(self) -> Self;
}

#[cfg(not(feature = "std"))]
impl FloatPolyfill for f64 {
    fn abs(self) -> Self {
        libm::fabs(self)
    }

    fn powi(self, n: i32) -> Self {
        libm::pow(self, n as f64)
    }

    fn sqrt(self) -> Self {
        libm::sqrt(self)
    }
}
