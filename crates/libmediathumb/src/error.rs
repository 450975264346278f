//! Module for the Error type this library uses

use std::{
	backtrace::Backtrace,
	io::Error as ioError,
	path::Path,
	thread::JoinHandle,
};

/// Macro to not repeat having to do multiple implementations of a [ErrorInner] variant with the same string type
macro_rules! fn_string {
	($fn_name:ident, $fortype:expr) => {
		#[doc = concat!("Create a new [Self] as [", stringify!($fortype), "]")]
		pub fn $fn_name<M>(msg: M) -> Self
		where
			M: Into<String>,
		{
			return Self::new($fortype(msg.into()));
		}
	};
}

/// Error type for libmediathumb, contains a backtrace, wrapper around [ErrorInner]
#[derive(Debug)]
pub struct Error {
	/// The actual error
	source:    ErrorInner,
	/// The backtrace for the error
	backtrace: Backtrace,
}

impl Error {
	/// Construct a new [Error] instance based on [ErrorInner]
	pub fn new(source: ErrorInner) -> Self {
		return Self {
			source,
			backtrace: Backtrace::capture(),
		};
	}

	/// Get the backtrace that is stored
	pub fn get_backtrace(&self) -> &Backtrace {
		return &self.backtrace;
	}

	/// Get the inner error kind
	pub fn inner(&self) -> &ErrorInner {
		return &self.source;
	}

	/// Create a custom [ioError] with this [Error] wrapped around with a [Path] attached
	pub fn custom_ioerror_path<M, P>(kind: std::io::ErrorKind, msg: M, path: P) -> Self
	where
		M: Into<String>,
		P: AsRef<Path>,
	{
		return Self::new(ErrorInner::IoError(
			ioError::new(kind, msg.into()),
			format_path(path.as_ref().to_string_lossy().to_string()),
		));
	}

	/// Create a custom [ioError] with this [Error] wrapped around with a location attached
	pub fn custom_ioerror_location<M, L>(kind: std::io::ErrorKind, msg: M, location: L) -> Self
	where
		M: Into<String>,
		L: AsRef<str>,
	{
		return Self::new(ErrorInner::IoError(
			ioError::new(kind, msg.into()),
			format_location(location.as_ref()),
		));
	}

	fn_string!(other, ErrorInner::Other);
	fn_string!(no_captures, ErrorInner::NoCapturesFound);
	fn_string!(command_unsuccessful, ErrorInner::CommandNotSuccesful);

	/// Map a [std::thread::JoinHandle::join] error to a [Error] with a thread name
	fn map_thread_join<N: AsRef<str>>(name: N) -> impl Fn(Box<dyn std::any::Any + Send + 'static>) -> Self {
		return move |from| {
			let name = name.as_ref().to_owned();
			if let Some(v) = from.downcast_ref::<String>() {
				return Self::new(ErrorInner::ThreadJoinError(v.clone(), name));
			}
			if let Some(v) = from.downcast_ref::<&str>() {
				return Self::new(ErrorInner::ThreadJoinError(v.to_string(), name));
			}

			return Self::new(ErrorInner::ThreadJoinError("unknown error".into(), name));
		};
	}
}

impl PartialEq for Error {
	fn eq(&self, other: &Self) -> bool {
		return self.source == other.source;
	}
}

impl std::fmt::Display for Error {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		return self.source.fmt(f);
	}
}

impl std::error::Error for Error {
	fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
		return self.source.source();
	}
}

// implement all From<> variants that ErrorInner also implements
impl<T> From<T> for Error
where
	T: Into<ErrorInner>,
{
	fn from(value: T) -> Self {
		return Self::new(value.into());
	}
}

// a poisoned lock only means another thread panicked while holding it, report it instead of propagating the panic
impl<G> From<std::sync::PoisonError<G>> for ErrorInner {
	fn from(value: std::sync::PoisonError<G>) -> Self {
		return Self::LockPoisoned(value.to_string());
	}
}

/// Error type for "mediathumb", implements all Error types that could happen in this lib
#[derive(thiserror::Error, Debug)]
pub enum ErrorInner {
	/// Wrapper Variant for [`std::io::Error`]
	/// Argument 1 (String) is up to the implementation to set, commonly the path
	#[error("IoError: {0}; {1}")]
	IoError(std::io::Error, String),
	/// Wrapper Variant for [`std::string::FromUtf8Error`]
	#[error("FromStringUTF8Error: {0}")]
	FromStringUTF8Error(#[from] std::string::FromUtf8Error),
	/// Variant for serde-json Errors
	#[error("SerdeJSONError: {0}")]
	SerdeJSONError(#[from] serde_json::Error),
	/// Variant for image decoding / encoding errors
	#[error("ImageError: {0}")]
	ImageError(#[from] image::ImageError),

	/// Variant for a diesel Connection Error (sql i/o)
	#[error("SQLConnectionError: {0}")]
	SQLConnectionError(#[from] diesel::ConnectionError),
	/// Variant for a diesel SQL Operation Error
	#[error("SQLOperationError: {0}")]
	SQLOperationError(#[from] diesel::result::Error),

	/// Variant for when a spawned command was not successfull
	#[error("CommandNotSuccessfull: {0}")]
	CommandNotSuccesful(String),
	/// Variant for when no regex captures have been found
	#[error("NoCapturesFound: {0}")]
	NoCapturesFound(String),
	/// Variant for thread join errors
	#[error("ThreadJoinError: name: \"{1}\" original error: {0}")]
	ThreadJoinError(String, String),
	/// Variant for a lock that was poisoned by a panicking thread
	#[error("LockPoisoned: {0}")]
	LockPoisoned(String),
	/// Variant for Other messages
	#[error("Other: {0}")]
	Other(String),
}

// this is custom, some errors like "std::io::Error" do not implement "PartialEq", but some inner type may do
impl PartialEq for ErrorInner {
	fn eq(&self, other: &Self) -> bool {
		match (self, other) {
			(Self::IoError(l0, l1), Self::IoError(r0, r1)) => return l0.kind() == r0.kind() && l1 == r1,
			(Self::FromStringUTF8Error(l0), Self::FromStringUTF8Error(r0)) => return l0 == r0,
			(Self::SQLConnectionError(l0), Self::SQLConnectionError(r0)) => return l0 == r0,
			(Self::SQLOperationError(l0), Self::SQLOperationError(r0)) => return l0 == r0,
			// image and serde_json errors dont implement PartialEq, compare their messages
			(Self::ImageError(l0), Self::ImageError(r0)) => return l0.to_string() == r0.to_string(),
			(Self::SerdeJSONError(l0), Self::SerdeJSONError(r0)) => return l0.to_string() == r0.to_string(),

			(Self::CommandNotSuccesful(l0), Self::CommandNotSuccesful(r0)) => return l0 == r0,
			(Self::NoCapturesFound(l0), Self::NoCapturesFound(r0)) => return l0 == r0,
			(Self::Other(l0), Self::Other(r0)) => return l0 == r0,
			(Self::LockPoisoned(l0), Self::LockPoisoned(r0)) => return l0 == r0,
			(Self::ThreadJoinError(l0, l1), Self::ThreadJoinError(r0, r1)) => return l0 == r0 && l1 == r1,

			(_, _) => return false,
		}
	}
}

/// Custom [std::thread::JoinHandle::join] implementation to return a [Error] with thread name
pub trait CustomThreadJoin<T> {
	/// Custom thread join method for libmediathumb so that errors are automatically mapped to the current error type and have the named from the thread
	fn join_err(self) -> Result<T, crate::Error>;
}

impl<T> CustomThreadJoin<T> for JoinHandle<T> {
	fn join_err(self) -> Result<T, crate::Error> {
		let name = self.thread().name().unwrap_or("<unnamed>").to_owned();
		return self.join().map_err(crate::Error::map_thread_join(name));
	}
}

/// Helper function to keep consistent formatting
#[inline]
fn format_path(msg: String) -> String {
	return format!("Path \"{}\"", msg);
}
/// Helper function to keep consistent formatting
#[inline]
fn format_location(msg: &str) -> String {
	return format!("Location \"{}\"", msg);
}

/// Trait to map [std::io::Error] into [Error]
pub trait IOErrorToError<T> {
	/// Map a [std::io::Error] to [Error] with a [std::path::Path] attached
	fn attach_path_err<P: AsRef<Path>>(self, path: P) -> Result<T, crate::Error>;
	/// Map a [std::io::Error] to [Error] with a location attached (for when [attach_path_err] is not applicable)
	fn attach_location_err<P: AsRef<str>>(self, pipe_msg: P) -> Result<T, crate::Error>;
}

impl<T> IOErrorToError<T> for Result<T, std::io::Error> {
	fn attach_path_err<P: AsRef<Path>>(self, path: P) -> Result<T, crate::Error> {
		return match self {
			Ok(v) => Ok(v),
			Err(e) => Err(crate::Error::new(ErrorInner::IoError(
				e,
				format_path(path.as_ref().to_string_lossy().to_string()),
			))),
		};
	}

	fn attach_location_err<L: AsRef<str>>(self, location: L) -> Result<T, crate::Error> {
		return match self {
			Ok(v) => Ok(v),
			Err(e) => Err(crate::Error::new(ErrorInner::IoError(
				e,
				format_location(location.as_ref()),
			))),
		};
	}
}
