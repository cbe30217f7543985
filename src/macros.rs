/// Builds a [`Value::Dict`](value/enum.Value.html) from `key => value` pairs.
#[macro_export]
macro_rules! dict {
    ($($k:expr => $v:expr),* $(,)?) => {{
        #[allow(unused_mut)]
        let mut d = $crate::value::Dict::new();
        $(d.insert(::std::string::String::from($k), $crate::value::Value::from($v));)*
        $crate::value::Value::Dict(d)
    }};
}

macro_rules! message_ids {
    ($(#[$attr:meta])* pub enum $n:ident { $($(#[$vattr:meta])* $v:ident = $code:literal,)* }) => {
        $(#[$attr])*
        #[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
        pub enum $n {
            $($(#[$vattr])* $v = $code,)*
        }

        impl $n {
            pub const ALL: &'static [$n] = &[$($n::$v,)*];

            /// Returns the wire message id.
            pub fn code(self) -> u32 {
                self as u32
            }

            pub fn from_code(code: u32) -> Option<Self> {
                Some(match code {
                    $($code => $n::$v,)*
                    _ => return None,
                })
            }
        }

        impl ::std::fmt::Display for $n {
            fn fmt(&self, f: &mut ::std::fmt::Formatter) -> ::std::fmt::Result {
                write!(f, "{:?}({})", self, self.code())
            }
        }
    };
}
