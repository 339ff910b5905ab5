//! RSA2 (RSA PKCS#1 v1.5 with SHA-256) signatures over gateway parameter sets.
//!
//! The signed content is every non-empty parameter except the excluded ones, sorted by key and joined as
//! `k1=v1&k2=v2`. Signatures travel base64-encoded.
use std::collections::BTreeMap;

use rsa::{
    pkcs1::DecodeRsaPrivateKey,
    pkcs1v15::{Signature, SigningKey, VerifyingKey},
    pkcs8::{DecodePrivateKey, DecodePublicKey},
    signature::{SignatureEncoding, Signer, Verifier},
    RsaPrivateKey,
    RsaPublicKey,
};
use sha2::Sha256;

use crate::gateway::GatewayError;

/// Builds the canonical string that gets signed.
pub fn signing_content<'a, I>(params: I, exclude: &[&str]) -> String
where I: IntoIterator<Item = (&'a String, &'a String)> {
    let sorted = params
        .into_iter()
        .filter(|(k, v)| !v.is_empty() && !exclude.contains(&k.as_str()))
        .collect::<BTreeMap<_, _>>();
    sorted.into_iter().map(|(k, v)| format!("{k}={v}")).collect::<Vec<_>>().join("&")
}

fn strip_whitespace(s: &str) -> String {
    s.chars().filter(|c| !c.is_whitespace()).collect()
}

#[derive(Clone)]
pub struct Rsa2Signer {
    key: SigningKey<Sha256>,
}

impl Rsa2Signer {
    /// Accepts a PEM document, or bare base64 DER in either PKCS#8 or PKCS#1 form.
    pub fn from_key_str(key: &str) -> Result<Self, GatewayError> {
        let key = key.trim();
        let private = if key.starts_with("-----BEGIN") {
            RsaPrivateKey::from_pkcs8_pem(key)
                .or_else(|_| RsaPrivateKey::from_pkcs1_pem(key))
                .map_err(|e| GatewayError::Configuration(format!("Invalid private key: {e}")))?
        } else {
            let der = base64::decode(strip_whitespace(key))
                .map_err(|e| GatewayError::Configuration(format!("Private key is not valid base64: {e}")))?;
            RsaPrivateKey::from_pkcs8_der(&der)
                .or_else(|_| RsaPrivateKey::from_pkcs1_der(&der))
                .map_err(|e| GatewayError::Configuration(format!("Invalid private key: {e}")))?
        };
        Ok(Self { key: SigningKey::<Sha256>::new(private) })
    }

    pub fn sign(&self, content: &str) -> Result<String, GatewayError> {
        let signature = self
            .key
            .try_sign(content.as_bytes())
            .map_err(|e| GatewayError::Signature(format!("Could not sign request: {e}")))?;
        Ok(base64::encode(signature.to_bytes()))
    }
}

#[derive(Clone)]
pub struct Rsa2Verifier {
    key: VerifyingKey<Sha256>,
}

impl Rsa2Verifier {
    /// Accepts a PEM document or bare base64 SPKI DER.
    pub fn from_key_str(key: &str) -> Result<Self, GatewayError> {
        let key = key.trim();
        let public = if key.starts_with("-----BEGIN") {
            RsaPublicKey::from_public_key_pem(key)
        } else {
            let der = base64::decode(strip_whitespace(key))
                .map_err(|e| GatewayError::Configuration(format!("Public key is not valid base64: {e}")))?;
            RsaPublicKey::from_public_key_der(&der)
        }
        .map_err(|e| GatewayError::Configuration(format!("Invalid public key: {e}")))?;
        Ok(Self { key: VerifyingKey::<Sha256>::new(public) })
    }

    pub fn verify(&self, content: &str, signature_b64: &str) -> Result<(), GatewayError> {
        let bytes = base64::decode(strip_whitespace(signature_b64))
            .map_err(|e| GatewayError::Signature(format!("Signature is not valid base64: {e}")))?;
        let signature = Signature::try_from(bytes.as_slice())
            .map_err(|e| GatewayError::Signature(format!("Malformed signature: {e}")))?;
        self.key
            .verify(content.as_bytes(), &signature)
            .map_err(|_| GatewayError::Signature("Signature does not match the parameters".into()))
    }
}
