use crate::Error;

/// Host-independent outcome of a native queue call. Host adapters translate their own status
/// codes into this closed set, nothing above the adapters looks at native codes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T> {
    /// The call succeeded on a local object
    Success(T),
    /// The call reached a local object but failed
    Failure(Failure),
    /// The handle does not name a live queue
    InvalidHandle,
    /// The handle names an object owned by another node
    UnsupportedRemote,
}

/// Local failure reasons
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Failure {
    /// No space (send) or no message (receive) and the caller may not wait
    #[error("unsatisfied")]
    WouldBlock,
    /// The wait bound expired
    #[error("timed out")]
    TimedOut,
    /// The queue was deleted while the caller was waiting
    #[error("object was deleted")]
    Deleted,
    /// The message does not fit the queue (or the buffer does not fit the message)
    #[error("invalid size")]
    InvalidSize,
    /// The host is out of resources, carries the host diagnostic text
    #[error("{0}")]
    Exhausted(String),
    /// Unexpected host error, carries the host diagnostic text
    #[error("{0}")]
    Internal(String),
}

impl<T> Outcome<T> {
    /// Returns true for [`Outcome::Success`]
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }
    /// Maps the success value
    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> Outcome<U> {
        match self {
            Outcome::Success(v) => Outcome::Success(f(v)),
            Outcome::Failure(e) => Outcome::Failure(e),
            Outcome::InvalidHandle => Outcome::InvalidHandle,
            Outcome::UnsupportedRemote => Outcome::UnsupportedRemote,
        }
    }
    /// Converts the outcome into the crate result. `would_block` is the error reported when the
    /// operation could not be completed without waiting (full for senders, empty for receivers).
    pub fn into_result(self, would_block: Error) -> crate::Result<T> {
        match self {
            Outcome::Success(v) => Ok(v),
            Outcome::Failure(Failure::WouldBlock) => Err(would_block),
            Outcome::Failure(Failure::TimedOut) => Err(Error::Timeout),
            Outcome::Failure(Failure::Deleted) => Err(Error::ChannelClosed),
            Outcome::Failure(Failure::InvalidSize) => {
                Err(Error::InvalidData("invalid message size".to_owned()))
            }
            Outcome::Failure(Failure::Exhausted(text) | Failure::Internal(text)) => {
                Err(Error::Failed(text))
            }
            Outcome::InvalidHandle => Err(Error::InvalidHandle),
            Outcome::UnsupportedRemote => Err(Error::RemoteObject),
        }
    }
}

#[cfg(test)]
mod test {
    use super::{Failure, Outcome};
    use crate::Error;

    #[test]
    fn test_translation() {
        let full = || Error::ChannelFull;
        assert_eq!(Outcome::Success(3).into_result(full()), Ok(3));
        assert_eq!(
            Outcome::<()>::Failure(Failure::WouldBlock).into_result(Error::ChannelEmpty),
            Err(Error::ChannelEmpty)
        );
        assert_eq!(
            Outcome::<()>::Failure(Failure::WouldBlock).into_result(full()),
            Err(Error::ChannelFull)
        );
        assert_eq!(
            Outcome::<()>::Failure(Failure::TimedOut).into_result(full()),
            Err(Error::Timeout)
        );
        assert_eq!(
            Outcome::<()>::Failure(Failure::Deleted).into_result(full()),
            Err(Error::ChannelClosed)
        );
        assert_eq!(
            Outcome::<()>::InvalidHandle.into_result(full()),
            Err(Error::InvalidHandle)
        );
        assert_eq!(
            Outcome::<()>::UnsupportedRemote.into_result(full()),
            Err(Error::RemoteObject)
        );
        assert_eq!(
            Outcome::<()>::Failure(Failure::Exhausted("too many".into())).into_result(full()),
            Err(Error::Failed("too many".into()))
        );
    }

    #[test]
    fn test_map() {
        assert_eq!(Outcome::Success(2).map(|v| v * 2), Outcome::Success(4));
        assert_eq!(
            Outcome::<u32>::InvalidHandle.map(|v| v * 2),
            Outcome::InvalidHandle
        );
        assert!(!Outcome::<()>::Failure(Failure::TimedOut).is_success());
    }

    #[test]
    fn test_failure_text() {
        insta::assert_snapshot!(Failure::Exhausted("too many".into()), @"too many");
        insta::assert_snapshot!(Failure::WouldBlock, @"unsatisfied");
    }
}
