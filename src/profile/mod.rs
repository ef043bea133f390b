//! Named limiter profiles and the registry that binds them to a backend.
//!
//! Every profile stores its counts under its own namespace, so the same request key never
//! shares a bucket between two profiles.

mod key;

pub use key::{KeyError, KeyShape, RequestDescriptor};

use crate::backend::Backend;
use crate::engine::Limiter;
use crate::error::RegistryError;
use crate::policy::QuotaPolicy;
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt::{Display, Formatter};

const STRICT_POLICY: QuotaPolicy = QuotaPolicy::fixed(5, 60, 300);
const LOGIN_POLICY: QuotaPolicy = QuotaPolicy::fixed(5, 900, 900);
const PASSWORD_RESET_POLICY: QuotaPolicy = QuotaPolicy::fixed(3, 3600, 3600);

#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum ProfileName {
    /// Applied to every request, quota from configuration.
    Global,
    /// Sensitive endpoints that are not authentication.
    Strict,
    Login,
    PasswordReset,
    /// Caller supplied quota, identified by name.
    Custom(String),
}

impl ProfileName {
    pub fn namespace(&self) -> Cow<'static, str> {
        match self {
            ProfileName::Global => Cow::Borrowed("rl"),
            ProfileName::Strict => Cow::Borrowed("strict_rl"),
            ProfileName::Login => Cow::Borrowed("login_rl"),
            ProfileName::PasswordReset => Cow::Borrowed("pwd_reset_rl"),
            ProfileName::Custom(name) => Cow::Owned(format!("custom_rl:{name}")),
        }
    }
}

impl Display for ProfileName {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ProfileName::Global => f.write_str("global"),
            ProfileName::Strict => f.write_str("strict"),
            ProfileName::Login => f.write_str("login"),
            ProfileName::PasswordReset => f.write_str("password-reset"),
            ProfileName::Custom(name) => write!(f, "custom:{name}"),
        }
    }
}

/// A quota policy bound to a key derivation rule. Immutable once constructed.
#[derive(Debug, Clone)]
pub struct Profile {
    name: ProfileName,
    namespace: Cow<'static, str>,
    key_shape: KeyShape,
    policy: QuotaPolicy,
    message: &'static str,
}

impl Profile {
    fn new(
        name: ProfileName,
        key_shape: KeyShape,
        policy: QuotaPolicy,
        message: &'static str,
    ) -> Self {
        Self {
            namespace: name.namespace(),
            name,
            key_shape,
            policy,
            message,
        }
    }

    pub fn global(policy: QuotaPolicy) -> Self {
        Self::new(ProfileName::Global, KeyShape::Route, policy, "Too many requests")
    }

    /// 5 requests per minute, then blocked for 5 minutes.
    pub fn strict() -> Self {
        Self::new(
            ProfileName::Strict,
            KeyShape::Route,
            STRICT_POLICY,
            "Too many requests. Please try again later.",
        )
    }

    /// 5 attempts per 15 minutes from one address, then blocked for 15 minutes.
    pub fn login() -> Self {
        Self::new(
            ProfileName::Login,
            KeyShape::ClientAddress { prefix: "login_" },
            LOGIN_POLICY,
            "Too many login attempts. Please try again later.",
        )
    }

    /// 3 attempts per hour from one address, then blocked for an hour.
    pub fn password_reset() -> Self {
        Self::new(
            ProfileName::PasswordReset,
            KeyShape::ClientAddress {
                prefix: "pwd_reset_",
            },
            PASSWORD_RESET_POLICY,
            "Too many password reset attempts. Please try again later.",
        )
    }

    pub fn custom(name: &str, policy: QuotaPolicy) -> Self {
        Self::new(
            ProfileName::Custom(name.to_owned()),
            KeyShape::Route,
            policy,
            "Too many requests",
        )
    }

    pub fn name(&self) -> &ProfileName {
        &self.name
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn policy(&self) -> &QuotaPolicy {
        &self.policy
    }

    /// Human readable message returned to a rejected client.
    pub fn message(&self) -> &'static str {
        self.message
    }

    pub fn derive_key(&self, request: &RequestDescriptor) -> Result<String, KeyError> {
        self.key_shape.derive(request)
    }
}

/// Every profile of the application, each bound to the backend selected at start up.
///
/// Built once and shared read-only with the middleware.
pub struct LimiterRegistry<B> {
    global: Limiter<B>,
    strict: Limiter<B>,
    login: Limiter<B>,
    password_reset: Limiter<B>,
    custom: HashMap<String, Limiter<B>>,
}

impl<B: Backend> LimiterRegistry<B> {
    /// # Arguments
    ///
    /// * `backend`: The store shared by every profile.
    /// * `global`: The configured quota for the global profile.
    pub fn builder(backend: B, global: QuotaPolicy) -> RegistryBuilder<B> {
        RegistryBuilder {
            backend,
            global,
            custom: Vec::new(),
        }
    }

    pub fn global(&self) -> &Limiter<B> {
        &self.global
    }

    pub fn strict(&self) -> &Limiter<B> {
        &self.strict
    }

    pub fn login(&self) -> &Limiter<B> {
        &self.login
    }

    pub fn password_reset(&self) -> &Limiter<B> {
        &self.password_reset
    }

    pub fn custom(&self, name: &str) -> Option<&Limiter<B>> {
        self.custom.get(name)
    }

    pub fn get(&self, name: &ProfileName) -> Option<&Limiter<B>> {
        match name {
            ProfileName::Global => Some(&self.global),
            ProfileName::Strict => Some(&self.strict),
            ProfileName::Login => Some(&self.login),
            ProfileName::PasswordReset => Some(&self.password_reset),
            ProfileName::Custom(name) => self.custom(name),
        }
    }
}

pub struct RegistryBuilder<B> {
    backend: B,
    global: QuotaPolicy,
    custom: Vec<(String, u64, u64, u64)>,
}

impl<B: Backend> RegistryBuilder<B> {
    /// Register a custom profile, validated when the registry is built.
    pub fn custom(mut self, name: &str, points: u64, duration_secs: u64, block_secs: u64) -> Self {
        self.custom
            .push((name.to_owned(), points, duration_secs, block_secs));
        self
    }

    pub fn build(self) -> Result<LimiterRegistry<B>, RegistryError> {
        let mut custom = HashMap::with_capacity(self.custom.len());
        for (name, points, duration, block) in self.custom {
            let policy = QuotaPolicy::new(points, duration, block).map_err(|source| {
                RegistryError::InvalidPolicy {
                    profile: ProfileName::Custom(name.clone()),
                    source,
                }
            })?;
            if custom.contains_key(&name) {
                return Err(RegistryError::DuplicateProfile(name));
            }
            let limiter = Limiter::new(self.backend.clone(), Profile::custom(&name, policy));
            custom.insert(name, limiter);
        }
        Ok(LimiterRegistry {
            global: Limiter::new(self.backend.clone(), Profile::global(self.global)),
            strict: Limiter::new(self.backend.clone(), Profile::strict()),
            login: Limiter::new(self.backend.clone(), Profile::login()),
            password_reset: Limiter::new(self.backend, Profile::password_reset()),
            custom,
        })
    }
}
