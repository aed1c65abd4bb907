use anyhow::Context;
use async_trait::async_trait;
use openidconnect::core::{CoreAuthenticationFlow, CoreClient, CoreProviderMetadata};
use openidconnect::{
    AuthorizationCode, ClientId, ClientSecret, CsrfToken, IssuerUrl, Nonce, PkceCodeChallenge,
    PkceCodeVerifier, RedirectUrl, Scope, TokenResponse,
};
use tracing::{debug, info};

use crate::config::GoogleConfig;

const GOOGLE_ISSUER: &str = "https://accounts.google.com";

/// What a provider vouches for after a verified ID token. Only `email` is
/// trusted, and only when `email_verified` is set.
#[derive(Debug, Clone)]
pub struct FederatedAssertion {
    pub email: String,
    pub email_verified: bool,
}

/// Where to send the browser, plus the secrets that must come back with
/// the callback. The caller keeps them in the signed state cookie.
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    pub url: String,
    pub state: String,
    pub nonce: String,
    pub pkce_verifier: String,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    fn authorize(&self) -> AuthorizationRequest;

    /// Redeem the authorization code with the PKCE verifier and check the
    /// returned ID token against `nonce`.
    async fn exchange_code(
        &self,
        code: &str,
        pkce_verifier: &str,
        nonce: &str,
    ) -> anyhow::Result<FederatedAssertion>;
}

/// Google via OpenID Connect. Provider metadata and signing keys are
/// discovered once at startup.
pub struct GoogleProvider {
    metadata: CoreProviderMetadata,
    client_id: ClientId,
    client_secret: ClientSecret,
    redirect_url: RedirectUrl,
    http: openidconnect::reqwest::Client,
}

impl GoogleProvider {
    #[tracing::instrument(skip(config))]
    pub async fn discover(config: &GoogleConfig) -> anyhow::Result<Self> {
        let http = openidconnect::reqwest::ClientBuilder::new()
            .redirect(openidconnect::reqwest::redirect::Policy::none())
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .context("build http client for google oidc")?;

        let issuer = IssuerUrl::new(GOOGLE_ISSUER.to_string()).context("google issuer url")?;
        let metadata = CoreProviderMetadata::discover_async(issuer, &http)
            .await
            .context("google oidc discovery failed")?;
        let redirect_url =
            RedirectUrl::new(config.redirect_url.clone()).context("invalid google redirect url")?;

        info!("google oidc provider initialized");
        Ok(Self {
            metadata,
            client_id: ClientId::new(config.client_id.clone()),
            client_secret: ClientSecret::new(config.client_secret.clone()),
            redirect_url,
            http,
        })
    }
}

#[async_trait]
impl IdentityProvider for GoogleProvider {
    fn authorize(&self) -> AuthorizationRequest {
        let (pkce_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();
        let client = CoreClient::from_provider_metadata(
            self.metadata.clone(),
            self.client_id.clone(),
            Some(self.client_secret.clone()),
        )
        .set_redirect_uri(self.redirect_url.clone());
        let (url, csrf_token, nonce) = client
            .authorize_url(
                CoreAuthenticationFlow::AuthorizationCode,
                CsrfToken::new_random,
                Nonce::new_random,
            )
            .add_scope(Scope::new("email".to_string()))
            .add_scope(Scope::new("profile".to_string()))
            .set_pkce_challenge(pkce_challenge)
            .url();

        AuthorizationRequest {
            url: url.to_string(),
            state: csrf_token.secret().clone(),
            nonce: nonce.secret().clone(),
            pkce_verifier: pkce_verifier.secret().clone(),
        }
    }

    async fn exchange_code(
        &self,
        code: &str,
        pkce_verifier: &str,
        nonce: &str,
    ) -> anyhow::Result<FederatedAssertion> {
        let client = CoreClient::from_provider_metadata(
            self.metadata.clone(),
            self.client_id.clone(),
            Some(self.client_secret.clone()),
        )
        .set_redirect_uri(self.redirect_url.clone());
        let token_response = client
            .exchange_code(AuthorizationCode::new(code.to_string()))
            .context("google token endpoint not configured")?
            .set_pkce_verifier(PkceCodeVerifier::new(pkce_verifier.to_string()))
            .request_async(&self.http)
            .await
            .map_err(|e| anyhow::anyhow!("google token exchange failed: {e}"))?;

        let id_token = token_response
            .id_token()
            .context("no id token in google response")?;
        let claims = id_token
            .claims(&client.id_token_verifier(), &Nonce::new(nonce.to_string()))
            .map_err(|e| anyhow::anyhow!("google id token rejected: {e}"))?;

        let email = claims
            .email()
            .map(|e| e.as_str().to_string())
            .context("no email in google id token")?;
        let email_verified = claims.email_verified().unwrap_or(false);

        debug!(%email, verified = email_verified, "google assertion received");
        Ok(FederatedAssertion {
            email,
            email_verified,
        })
    }
}
