use std::fmt::{self, Display, Formatter, Result};

use owo_colors::OwoColorize;

#[doc(hidden)]
pub struct DebugDisplay<T>(T);

impl<T> Display for DebugDisplay<T>
where
    T: fmt::Debug,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

#[doc(hidden)]
#[expect(non_camel_case_types)]
pub struct _display<'a, T: ?Sized>(pub &'a T);

impl<'a, T> Display for _display<'a, &T>
where
    _display<'a, T>: Display,
{
    #[inline]
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        _display(*self.0).fmt(f)
    }
}

/// Colour a value for log output.
macro_rules! display {
    (@impl $t:ty => $style:ident) => {
        impl ::std::fmt::Display for $crate::display::_display<'_, $t> {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                ::std::fmt::Display::fmt(&self.0.$style(), f)
            }
        }
    };

    ($x:expr) => {{ $crate::display::_display(&$x) }};
}

display!(@impl std::io::Error => bright_red);
display!(@impl std::net::SocketAddr => bright_yellow);
display!(@impl crate::mapping::ListenAddr => bright_yellow);
display!(@impl crate::mapping::ForwardAddr => bright_yellow);

impl Display for _display<'_, std::time::Duration> {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        DebugDisplay(self.0).dimmed().fmt(f)
    }
}

impl Display for _display<'_, crate::mapping::Mapping> {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        write!(
            f,
            "{} -> {} {}",
            display!(self.0.listen_addr),
            display!(self.0.forward_addr),
            self.0.mapping_type.dimmed()
        )
    }
}
