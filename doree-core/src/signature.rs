use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::{CoreError, CoreResult};

type HmacSha256 = Hmac<Sha256>;

/// HMAC-SHA256 checks for everything the gateway signs.
///
/// Checkout callbacks sign `order_ref|payment_ref` with the API key secret;
/// webhooks sign the raw request body with the webhook secret. Both arrive
/// hex-encoded.
#[derive(Clone)]
pub struct SignatureVerifier {
    secret: Vec<u8>,
}

impl std::fmt::Debug for SignatureVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureVerifier").finish_non_exhaustive()
    }
}

impl SignatureVerifier {
    pub fn new(secret: &str) -> CoreResult<Self> {
        if secret.trim().is_empty() {
            return Err(CoreError::ConfigurationError(
                "signing secret must not be empty".to_string(),
            ));
        }
        Ok(Self {
            secret: secret.as_bytes().to_vec(),
        })
    }

    /// Verify the signature handed to the client by the checkout widget on success
    pub fn verify_checkout(
        &self,
        gateway_order_ref: &str,
        gateway_payment_ref: &str,
        signature_hex: &str,
    ) -> CoreResult<()> {
        let payload = checkout_payload(gateway_order_ref, gateway_payment_ref);
        self.verify(payload.as_bytes(), signature_hex)
    }

    /// Verify a webhook delivery against its raw body
    pub fn verify_webhook(&self, raw_body: &[u8], signature_hex: Option<&str>) -> CoreResult<()> {
        let Some(signature_hex) = signature_hex else {
            return Err(CoreError::InvalidSignature);
        };
        self.verify(raw_body, signature_hex)
    }

    pub fn sign_checkout(&self, gateway_order_ref: &str, gateway_payment_ref: &str) -> String {
        let payload = checkout_payload(gateway_order_ref, gateway_payment_ref);
        self.sign(payload.as_bytes())
    }

    pub fn sign(&self, payload: &[u8]) -> String {
        let mut mac = self.mac();
        mac.update(payload);
        hex::encode(mac.finalize().into_bytes())
    }

    fn verify(&self, payload: &[u8], signature_hex: &str) -> CoreResult<()> {
        let expected = hex::decode(signature_hex.trim()).map_err(|_| CoreError::InvalidSignature)?;
        let mut mac = self.mac();
        mac.update(payload);
        // verify_slice compares in constant time
        mac.verify_slice(&expected)
            .map_err(|_| CoreError::InvalidSignature)
    }

    fn mac(&self) -> HmacSha256 {
        HmacSha256::new_from_slice(&self.secret).expect("HMAC accepts keys of any length")
    }
}

fn checkout_payload(gateway_order_ref: &str, gateway_payment_ref: &str) -> String {
    format!("{}|{}", gateway_order_ref, gateway_payment_ref)
}
