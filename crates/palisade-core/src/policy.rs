//! Collaborator traits consumed by the handshake.
//!
//! The transport only moves challenge and response maps; deciding what they
//! contain and whether they are acceptable belongs to these collaborators.
//! All of them run synchronously on the thread driving the conversation,
//! except [`CredentialPrompt`], which the runtime calls from a blocking
//! worker so an interactive prompt never stalls other connections.

use std::net::SocketAddr;

use palisade_proto::Properties;

/// Everything the server knows about a login attempt once the response
/// arrives.
#[derive(Debug, Clone, Copy)]
pub struct LoginAttempt<'a> {
    /// Requested display name
    pub name: &'a str,
    /// Hardware identifier token sent by the client
    pub mac: &'a str,
    /// Remote socket address as observed by the server
    pub remote: SocketAddr,
    /// Challenge that was issued, `None` if none was
    pub challenge: Option<&'a Properties>,
    /// Client response, `None` if the client sent none
    pub response: Option<&'a Properties>,
}

/// Server-side login policy.
pub trait LoginValidator: Send + Sync {
    /// Challenge to issue for this login. An empty map means no challenge.
    fn challenge(&self, name: &str, remote: SocketAddr) -> Properties;

    /// Check the attempt. `Some(message)` rejects the login and `message` is
    /// sent to the client verbatim.
    fn verify(&self, attempt: &LoginAttempt<'_>) -> Option<String>;
}

/// Allocates the display name a newly promoted peer will be known by.
pub trait NameAllocator: Send + Sync {
    /// Return a name derived from `requested` that no current peer uses.
    fn unique_name(&self, requested: &str) -> String;
}

/// Receives a record of every successful login.
pub trait LoginAudit: Send + Sync {
    /// Called once per promoted connection
    fn logged_in(&self, name: &str, address: SocketAddr, mac: &str);
}

/// Interactive credential collection on the client.
///
/// May block for as long as a human takes to answer. Returning `None`
/// abandons the login.
pub trait CredentialPrompt: Send + Sync {
    /// Produce a response for the server's challenge
    fn collect(&self, challenge: &Properties) -> Option<Properties>;
}

impl<F> CredentialPrompt for F
where
    F: Fn(&Properties) -> Option<Properties> + Send + Sync,
{
    fn collect(&self, challenge: &Properties) -> Option<Properties> {
        self(challenge)
    }
}

impl<F> NameAllocator for F
where
    F: Fn(&str) -> String + Send + Sync,
{
    fn unique_name(&self, requested: &str) -> String {
        self(requested)
    }
}
