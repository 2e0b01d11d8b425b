/// Macro to implement the shared surface of a string-backed identifier
/// newtype: constructor, string access, `Display`, and `From` conversions.
#[macro_export]
macro_rules! impl_id_newtype {
    ($wrapper:ident) => {
        impl $wrapper {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $wrapper {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $wrapper {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $wrapper {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}
