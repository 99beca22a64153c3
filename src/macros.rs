// Hex-encode curve points into a debug event; compiled out of release builds.
#[cfg(debug_assertions)]
macro_rules! debug_points {
    ($msg:expr, $( $name:ident = $point:expr ),* $(,)?) => {
        tracing::debug!($( $name = %crate::utils::point_hex(&$point), )* $msg)
    };
}

#[cfg(not(debug_assertions))]
macro_rules! debug_points {
    ($( $tt:tt )*) => {
        ()
    };
}
