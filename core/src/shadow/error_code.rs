//! Error codes carried by rejected shadow acknowledgements

use std::fmt;

/// Numeric `code` field of a `.../rejected` shadow acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShadowErrorCode {
	/// 400: malformed request document
	BadRequest,
	/// 401
	Unauthorized,
	/// 403
	Forbidden,
	/// 404: no shadow document exists for the thing
	NotFound,
	/// 409: the request version does not match the document version
	Conflict,
	/// 413
	PayloadTooLarge,
	/// 415
	UnsupportedMediaType,
	/// 429
	TooManyRequests,
	/// 500
	InternalServiceFailure,
	/// Any code not listed above
	Other(u16),
}

impl ShadowErrorCode {
	/// Numeric value of the code.
	pub fn code(self) -> u16 {
		match self {
			| ShadowErrorCode::BadRequest => 400,
			| ShadowErrorCode::Unauthorized => 401,
			| ShadowErrorCode::Forbidden => 403,
			| ShadowErrorCode::NotFound => 404,
			| ShadowErrorCode::Conflict => 409,
			| ShadowErrorCode::PayloadTooLarge => 413,
			| ShadowErrorCode::UnsupportedMediaType => 415,
			| ShadowErrorCode::TooManyRequests => 429,
			| ShadowErrorCode::InternalServiceFailure => 500,
			| ShadowErrorCode::Other(code) => code,
		}
	}
}

impl From<u16> for ShadowErrorCode {
	fn from(code: u16) -> Self {
		match code {
			| 400 => ShadowErrorCode::BadRequest,
			| 401 => ShadowErrorCode::Unauthorized,
			| 403 => ShadowErrorCode::Forbidden,
			| 404 => ShadowErrorCode::NotFound,
			| 409 => ShadowErrorCode::Conflict,
			| 413 => ShadowErrorCode::PayloadTooLarge,
			| 415 => ShadowErrorCode::UnsupportedMediaType,
			| 429 => ShadowErrorCode::TooManyRequests,
			| 500 => ShadowErrorCode::InternalServiceFailure,
			| other => ShadowErrorCode::Other(other),
		}
	}
}

impl fmt::Display for ShadowErrorCode {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.code())
	}
}
