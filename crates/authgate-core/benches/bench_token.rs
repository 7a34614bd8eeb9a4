//! Benchmarks for token validation hot paths

#[path = "../tests/common/keys.rs"]
#[allow(dead_code)]
mod keys;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use authgate_core::{
    hash_token, ChallengeAnswer, ChallengeContext, CodeDelivery, Credentials, GatewayConfig,
    IdentityProvider, KeySet, ProviderError, ProviderResult, RefreshGrant, SignUpOutcome,
    SignUpRequest, SigningKeySet, SystemClock, TerminalKind, TokenSet, TokenValidator,
};
use chrono::Utc;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use keys::{test_jwk, TestClaims, TestKeyPair, TEST_KEY_ID};

/// Serves a fixed JWKS and refuses everything else
struct StaticKeys(KeySet);

#[async_trait]
impl IdentityProvider for StaticKeys {
    async fn initiate_auth(&self, _: &Credentials) -> ProviderResult {
        refused().into()
    }

    async fn respond_to_challenge(&self, _: &ChallengeContext, _: &ChallengeAnswer) -> ProviderResult {
        refused().into()
    }

    async fn fetch_signing_keys(&self) -> Result<KeySet, ProviderError> {
        Ok(self.0.clone())
    }

    async fn refresh_token(&self, _: &RefreshGrant) -> Result<TokenSet, ProviderError> {
        Err(refused())
    }

    async fn sign_up(&self, _: &SignUpRequest) -> Result<SignUpOutcome, ProviderError> {
        Err(refused())
    }

    async fn confirm_sign_up(&self, _: &str, _: &str) -> Result<(), ProviderError> {
        Err(refused())
    }

    async fn forgot_password(&self, _: &str) -> Result<CodeDelivery, ProviderError> {
        Err(refused())
    }

    async fn confirm_forgot_password(&self, _: &str, _: &str, _: &str) -> Result<(), ProviderError> {
        Err(refused())
    }

    async fn change_password(&self, _: &str, _: &str, _: &str) -> Result<(), ProviderError> {
        Err(refused())
    }
}

fn refused() -> ProviderError {
    ProviderError::terminal(TerminalKind::Rejected, "NotSupported")
}

fn config() -> GatewayConfig {
    GatewayConfig::new(
        "us-east-1_BENCH",
        "us-east-1",
        "bench-client",
        "bench-session-secret-at-least-32-bytes",
    )
}

fn bench_validate(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let config = config();
    let provider = Arc::new(StaticKeys(KeySet {
        keys: vec![test_jwk(TEST_KEY_ID)],
    }));
    let validator = TokenValidator::new(&config, provider, Arc::new(SystemClock));
    rt.block_on(validator.keys().warm()).unwrap();

    let keypair = TestKeyPair::load();
    let claims = TestClaims::valid(&config.cognito_issuer(), "bench-client", Utc::now());
    let valid = keypair.sign(&claims);
    let expired = keypair.sign(&TestClaims::expired(
        &config.cognito_issuer(),
        "bench-client",
        Utc::now(),
    ));

    let validator = &validator;
    let (valid, expired) = (valid.as_str(), expired.as_str());

    let mut group = c.benchmark_group("token_validate");

    group.bench_function("valid_warm_cache", |b| {
        b.to_async(&rt)
            .iter(|| async move { validator.validate(black_box(valid)).await.unwrap() });
    });

    // Rejected before any key lookup
    group.bench_function("expired", |b| {
        b.to_async(&rt)
            .iter(|| async move { validator.validate(black_box(expired)).await.unwrap_err() });
    });

    group.bench_function("malformed", |b| {
        b.to_async(&rt)
            .iter(|| async move { validator.validate(black_box("not.a.token")).await.unwrap_err() });
    });

    group.finish();
}

fn bench_key_set(c: &mut Criterion) {
    let mut group = c.benchmark_group("signing_key_set");

    for count in [1, 2, 4, 8] {
        let jwks = KeySet {
            keys: (0..count).map(|i| test_jwk(&format!("kid-{i}"))).collect(),
        };
        group.bench_with_input(BenchmarkId::new("from_jwks", count), &jwks, |b, jwks| {
            b.iter(|| {
                SigningKeySet::from_jwks(black_box(jwks), Utc::now(), Duration::from_secs(3600), 1)
            });
        });
    }

    group.finish();
}

fn bench_token_digest(c: &mut Criterion) {
    let keypair = TestKeyPair::load();
    let token = keypair.sign(&TestClaims::valid("https://issuer", "client", Utc::now()));

    c.bench_function("hash_token", |b| {
        b.iter(|| hash_token(black_box(&token)));
    });
}

criterion_group!(benches, bench_validate, bench_key_set, bench_token_digest);
criterion_main!(benches);
