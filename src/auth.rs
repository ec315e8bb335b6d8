/*!
 * Authentication strategy applied to every outgoing call
 *
 * geodb servers started with a password expect the header
 * `authorization: basic <password>`. The password is sent as-is after the
 * literal word `basic`; it is not base64 encoded HTTP Basic auth.
 */

use tonic::metadata::{Ascii, MetadataValue};
use tonic::service::Interceptor;
use tonic::{Request, Status};

use crate::error::Result;

/// Metadata key carrying the credentials
pub const AUTHORIZATION_HEADER: &str = "authorization";

/// How outgoing calls are authenticated
#[derive(Debug, Clone, Default)]
pub enum AuthStrategy {
    /// Calls pass through unmodified
    #[default]
    None,
    /// Calls carry `authorization: basic <secret>`
    Basic(MetadataValue<Ascii>),
}

impl AuthStrategy {
    /// Pick the strategy for a configured password; empty means unauthenticated.
    ///
    /// Fails if the password cannot be carried in an ASCII header.
    pub fn from_password(password: &str) -> Result<Self> {
        if password.is_empty() {
            return Ok(AuthStrategy::None);
        }

        let mut value: MetadataValue<Ascii> = format!("basic {}", password).parse()?;
        value.set_sensitive(true);
        Ok(AuthStrategy::Basic(value))
    }

    /// True when calls carry credentials
    pub fn is_authenticated(&self) -> bool {
        matches!(self, AuthStrategy::Basic(_))
    }

    /// Decorate an outgoing request
    pub fn apply<T>(&self, mut request: Request<T>) -> Request<T> {
        if let AuthStrategy::Basic(value) = self {
            request
                .metadata_mut()
                .insert(AUTHORIZATION_HEADER, value.clone());
        }
        request
    }
}

impl Interceptor for AuthStrategy {
    fn call(&mut self, request: Request<()>) -> std::result::Result<Request<()>, Status> {
        Ok(self.apply(request))
    }
}
