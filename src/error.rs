use snafu::Snafu;

/// The public Error type for this library.
#[derive(Debug, Snafu)]
pub struct Error(LibError);

/// The public Result type for this library.
pub type Result<T> = std::result::Result<T, Error>;

/// The internal Result type for this library.
pub(crate) type LibResult<T> = std::result::Result<T, LibError>;

/// The internal Error type for this library.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub(crate) enum LibError {
    #[snafu(display("{}: error while reading bytes: {}", site, source))]
    Io {
        site: String,
        source: crate::byte_iter::ByteError,
    },

    #[snafu(display("{}: error while writing bytes: {}", site, source))]
    Write {
        site: String,
        source: std::io::Error,
    },

    #[snafu(display("{}: the {} data is invalid: {}", site, format, description))]
    InvalidFormat {
        site: String,
        format: &'static str,
        description: String,
    },
}

macro_rules! site {
    () => {
        format!("{}:{}", file!(), line!())
    };
}

macro_rules! io {
    () => {
        crate::error::IoSnafu { site: site!() }
    };
}

macro_rules! wr {
    () => {
        crate::error::WriteSnafu { site: site!() }
    };
}

macro_rules! invalid_format_s {
    ($format:expr) => {
        crate::error::InvalidFormatSnafu {
            site: site!(),
            format: $format,
            description: "[no description]",
        }
    };
    ($format:expr, $msg:expr) => {
        crate::error::InvalidFormatSnafu {
            site: site!(),
            format: $format,
            description: $msg,
        }
    };
    ($format:expr, $fmt:expr, $($arg:expr),+) => {
        crate::error::InvalidFormatSnafu {
            site: site!(),
            format: $format,
            description: format!($fmt, $($arg),+),
        }
    };
}

macro_rules! invalid_format_e {
    ($format:expr) => {
        invalid_format_s!($format).build()
    };
    ($format:expr, $msg:expr) => {
        invalid_format_s!($format, $msg).build()
    };
    ($format:expr, $fmt:expr, $($arg:expr),+) => {
        invalid_format_s!($format, $fmt, $($arg),+).build()
    };
}

macro_rules! invalid_format_r {
    ($format:expr) => {
        Err(invalid_format_e!($format))
    };
    ($format:expr, $msg:expr) => {
        Err(invalid_format_e!($format, $msg))
    };
    ($format:expr, $fmt:expr, $($arg:expr),+) => {
        Err(invalid_format_e!($format, $fmt, $($arg),+))
    };
}

macro_rules! invalid_format {
    ($format:expr) => {
        return invalid_format_r!($format);
    };
    ($format:expr, $msg:expr) => {
        return invalid_format_r!($format, $msg)
    };
    ($format:expr, $fmt:expr, $($arg:expr),+) => {
        return invalid_format_r!($format, $fmt, $($arg),+)
    };
}

#[test]
fn site_test() {
    let line = line!() + 1;
    let site = site!();
    assert!(site.contains("error.rs"));
    assert!(site.contains(format!("{}", line).as_str()));
}

#[test]
fn invalid_format_macros_test_no_message() {
    fn foo() -> LibResult<u64> {
        invalid_format!("smf");
    }
    let result = foo();
    assert!(result.is_err());
    let message = format!("{}", result.err().unwrap());
    assert!(message.as_str().contains("the smf data is invalid"));
}

#[test]
fn invalid_format_macros_test_message() {
    fn foo() -> LibResult<u64> {
        let flerbin = String::from("flerbin");
        invalid_format!("mus", flerbin);
    }
    let result = foo();
    assert!(result.is_err());
    let message = format!("{}", result.err().unwrap());
    assert!(message.as_str().contains("flerbin"));
}

#[test]
fn invalid_format_macros_test_fmt() {
    fn foo() -> LibResult<u64> {
        invalid_format!("op2", "hello {}, {}", "world", String::from("foo"));
    }
    let result = foo();
    assert!(result.is_err());
    let message = format!("{}", result.err().unwrap());
    assert!(message.as_str().contains("hello world, foo"));
}
