//! Gateway close codes
//!
//! Reasons the server attaches when it closes the socket.

/// Close codes the gateway may send
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum CloseCode {
    UnknownError = 4000,
    /// We sent an op code the server does not know
    UnknownOpcode = 4001,
    /// We sent a frame the server could not decode
    DecodeError = 4002,
    /// We sent a frame before identifying
    NotAuthenticated = 4003,
    /// The token in Identify was rejected
    AuthenticationFailed = 4004,
    /// We sent more than one Identify
    AlreadyAuthenticated = 4005,
    /// The sequence in Resume was not valid
    InvalidSequence = 4007,
    /// We sent frames too fast
    RateLimited = 4008,
    /// The session expired, a fresh Identify is required
    SessionTimeout = 4009,
    InvalidShard = 4010,
    ShardingRequired = 4011,
    InvalidApiVersion = 4012,
}

impl CloseCode {
    /// Map a raw close code; codes outside the table give `None`
    #[must_use]
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            4000 => Some(Self::UnknownError),
            4001 => Some(Self::UnknownOpcode),
            4002 => Some(Self::DecodeError),
            4003 => Some(Self::NotAuthenticated),
            4004 => Some(Self::AuthenticationFailed),
            4005 => Some(Self::AlreadyAuthenticated),
            4007 => Some(Self::InvalidSequence),
            4008 => Some(Self::RateLimited),
            4009 => Some(Self::SessionTimeout),
            4010 => Some(Self::InvalidShard),
            4011 => Some(Self::ShardingRequired),
            4012 => Some(Self::InvalidApiVersion),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }

    /// Whether the token itself is bad, so retrying with it is pointless
    #[must_use]
    pub const fn is_authentication_failure(self) -> bool {
        matches!(self, Self::AuthenticationFailed)
    }

    /// Human readable reason
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::UnknownError => "unknown gateway error",
            Self::UnknownOpcode => "client sent an unknown op code",
            Self::DecodeError => "client sent an undecodable payload",
            Self::NotAuthenticated => "client sent a payload before identifying",
            Self::AuthenticationFailed => "the account token is incorrect",
            Self::AlreadyAuthenticated => "client identified more than once",
            Self::InvalidSequence => "resume sequence was invalid",
            Self::RateLimited => "client is sending payloads too quickly",
            Self::SessionTimeout => "session timed out",
            Self::InvalidShard => "invalid shard",
            Self::ShardingRequired => "sharding is required",
            Self::InvalidApiVersion => "invalid gateway version",
        }
    }
}

impl std::fmt::Display for CloseCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({:?})", self.as_u16(), self)
    }
}

impl From<CloseCode> for u16 {
    fn from(code: CloseCode) -> Self {
        code.as_u16()
    }
}
