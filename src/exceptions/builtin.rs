//! Error types for the names the bus itself owns.
//!
//! These are registered in every [`ErrorMap`](super::ErrorMap) and their
//! names are reserved: no application type may claim them.

/// Declare an error type that travels over the bus under `$remote`.
///
/// The type derives `thiserror::Error`, so the calling crate depends on
/// `thiserror` as well.
///
/// ```
/// rebus::bus_error! {
///     /// Raised when an order cannot be found.
///     pub OrderMissing => "org.example.Error.OrderMissing"
/// }
///
/// let err = OrderMissing::new("order 7");
/// assert_eq!(err.to_string(), "order 7");
/// ```
#[macro_export]
macro_rules! bus_error {
    ($(#[$meta:meta])* $vis:vis $name:ident => $remote:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, ::thiserror::Error)]
        #[error("{message}")]
        $vis struct $name {
            pub message: String,
        }

        impl $name {
            pub fn new(message: impl Into<String>) -> Self {
                Self {
                    message: message.into(),
                }
            }
        }

        impl $crate::exceptions::BusError for $name {
            const NAME: &'static str = $remote;

            fn from_message(message: String) -> Self {
                Self { message }
            }

            fn message(&self) -> String {
                self.message.clone()
            }
        }
    };
}

macro_rules! builtin_errors {
    ($($name:ident => $suffix:literal),+ $(,)?) => {
        $(
            crate::bus_error! {
                pub $name => concat!("org.freedesktop.DBus.Error.", $suffix)
            }
        )+

        pub(super) fn reserve_all(map: &mut super::Inner) {
            $( map.insert_reserved::<$name>(); )+
        }
    };
}

builtin_errors! {
    Failed => "Failed",
    NoMemory => "NoMemory",
    ServiceUnknown => "ServiceUnknown",
    NameHasNoOwner => "NameHasNoOwner",
    NoReply => "NoReply",
    IoError => "IOError",
    BadAddress => "BadAddress",
    NotSupported => "NotSupported",
    LimitsExceeded => "LimitsExceeded",
    AccessDenied => "AccessDenied",
    AuthFailed => "AuthFailed",
    NoServer => "NoServer",
    Timeout => "Timeout",
    NoNetwork => "NoNetwork",
    AddressInUse => "AddressInUse",
    Disconnected => "Disconnected",
    InvalidArgs => "InvalidArgs",
    FileExists => "FileExists",
    UnknownMethod => "UnknownMethod",
    UnknownObject => "UnknownObject",
    UnknownInterface => "UnknownInterface",
    UnknownProperty => "UnknownProperty",
    PropertyReadOnly => "PropertyReadOnly",
    UnixProcessIdUnknown => "UnixProcessIdUnknown",
    InvalidSignature => "InvalidSignature",
    InconsistentMessage => "InconsistentMessage",
    MatchRuleNotFound => "MatchRuleNotFound",
    MatchRuleInvalid => "MatchRuleInvalid",
    InteractiveAuthorizationRequired => "InteractiveAuthorizationRequired",
}
