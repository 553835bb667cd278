// src/strategy/ntlm.rs

use super::AuthStrategy;
use crate::error::ProbeError;
use crate::model::AuthType;
use crate::ntlm::{self as codec, ChallengeMessage, NtlmCredentials};
use crate::proxy_conn::{ProbeTarget, ProxyConnection, ProxyEndpoint};
use async_trait::async_trait;
use secrecy::SecretString;
use tracing::{debug, trace};

const SCHEME: &str = "NTLM";

/// NTLM challenge-response through the proxy's 407 gate.
///
/// Every URL gets its own connection and its own full handshake.
pub struct NtlmStrategy {
    endpoint: ProxyEndpoint,
    credentials: NtlmCredentials,
}

impl NtlmStrategy {
    pub fn new(endpoint: ProxyEndpoint, username: &str, password: SecretString) -> Self {
        Self {
            endpoint,
            credentials: NtlmCredentials::new(username, password),
        }
    }

    async fn handshake(&self, conn: &mut ProxyConnection, target: &ProbeTarget) -> Result<(), ProbeError> {
        let negotiate = codec::encode_header(&codec::negotiate_message());
        let reply = conn.send(target, Some(&negotiate)).await?;
        if !reply.auth_required() {
            // Some proxies accept the client after the negotiate leg alone.
            return reply.ensure_traversal(target);
        }

        let token = reply.challenge_token(SCHEME).ok_or_else(|| ProbeError::MalformedChallenge {
            message: "407 answer to NEGOTIATE carried no NTLM challenge".to_string(),
        })?;
        let challenge = ChallengeMessage::parse(&codec::decode_token(token)?)?;
        trace!(flags = challenge.flags, "Received NTLM challenge");

        let authenticate =
            codec::authenticate_message(&self.credentials, &challenge, rand::random(), codec::filetime_now())?;
        let reply = conn.send(target, Some(&codec::encode_header(&authenticate))).await?;
        reply.ensure_traversal(target)
    }
}

#[async_trait]
impl AuthStrategy for NtlmStrategy {
    fn auth_type(&self) -> AuthType {
        AuthType::Ntlm
    }

    async fn probe(&self, url: &str) -> Result<(), ProbeError> {
        let target = ProbeTarget::parse(url)?;
        let mut conn = ProxyConnection::open(&self.endpoint).await?;

        let first = conn.send(&target, None).await?;
        if !first.auth_required() {
            debug!(url = %url, status = first.status.as_u16(), "Proxy did not ask for authentication");
            return first.ensure_traversal(&target);
        }
        if !first.offers(SCHEME) {
            return Err(ProbeError::MissingChallenge { scheme: SCHEME });
        }

        // Squid may close the connection after the first 407.
        if first.closes_connection() || conn.is_closed() {
            debug!(url = %url, "Proxy closed the connection after 407, reconnecting");
            conn = ProxyConnection::open(&self.endpoint).await?;
        }
        self.handshake(&mut conn, &target).await
    }
}
