//! The message carrier threaded through the mediator pipeline.

use super::{Payload, PropertyMap};
use crate::utils::{generate_message_id, now_utc, Timestamp};
use serde::{Deserialize, Serialize};

/// A destination reference (endpoint address or logical queue name).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Destination(String);

impl Destination {
    /// Creates a destination from an address.
    #[must_use]
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    /// Returns the address.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where a context stands in its journey through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextState {
    /// Mediation may proceed.
    #[default]
    Continuing,
    /// Mediation was stopped; no further mediators run.
    Terminated,
    /// The live state was handed to a pending callback.
    Suspended,
}

impl std::fmt::Display for ContextState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Continuing => write!(f, "continuing"),
            Self::Terminated => write!(f, "terminated"),
            Self::Suspended => write!(f, "suspended"),
        }
    }
}

/// One in-flight message.
///
/// A context is owned by exactly one task at a time. Suspension moves the
/// live state out with [`MediationContext::suspend`], which is how ownership
/// is handed to the callback store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediationContext {
    message_id: String,
    #[serde(default)]
    properties: PropertyMap,
    #[serde(default)]
    payload: Payload,
    #[serde(default)]
    destination: Option<Destination>,
    #[serde(default)]
    reply_to: Option<Destination>,
    #[serde(default)]
    state: ContextState,
    #[serde(default)]
    is_response: bool,
    #[serde(default)]
    correlation_key: Option<String>,
    created_at: Timestamp,
}

impl MediationContext {
    /// Creates a new context with a generated message id.
    #[must_use]
    pub fn new(payload: Payload) -> Self {
        Self::with_message_id(generate_message_id(), payload)
    }

    /// Creates a new context with an explicit message id.
    #[must_use]
    pub fn with_message_id(message_id: impl Into<String>, payload: Payload) -> Self {
        Self {
            message_id: message_id.into(),
            properties: PropertyMap::new(),
            payload,
            destination: None,
            reply_to: None,
            state: ContextState::Continuing,
            is_response: false,
            correlation_key: None,
            created_at: now_utc(),
        }
    }

    /// Creates a response context correlated to an earlier outbound call.
    #[must_use]
    pub fn response(payload: Payload) -> Self {
        let mut ctx = Self::new(payload);
        ctx.is_response = true;
        ctx
    }

    /// Sets the destination.
    #[must_use]
    pub fn to(mut self, destination: Destination) -> Self {
        self.destination = Some(destination);
        self
    }

    /// Sets a property.
    #[must_use]
    pub fn with_property(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.properties.set(key, value);
        self
    }

    /// Returns the message id.
    #[must_use]
    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    /// Returns the properties.
    #[must_use]
    pub fn properties(&self) -> &PropertyMap {
        &self.properties
    }

    /// Returns the properties mutably.
    pub fn properties_mut(&mut self) -> &mut PropertyMap {
        &mut self.properties
    }

    /// Gets a single property.
    #[must_use]
    pub fn property(&self, key: &str) -> Option<&serde_json::Value> {
        self.properties.get(key)
    }

    /// Sets a single property.
    pub fn set_property(&mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) {
        self.properties.set(key, value);
    }

    /// Returns the payload.
    #[must_use]
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Replaces the payload.
    pub fn set_payload(&mut self, payload: Payload) {
        self.payload = payload;
    }

    /// Returns the current destination.
    #[must_use]
    pub fn destination(&self) -> Option<&Destination> {
        self.destination.as_ref()
    }

    /// Sets the current destination.
    pub fn set_destination(&mut self, destination: Destination) {
        self.destination = Some(destination);
    }

    /// Returns the reply-to destination.
    #[must_use]
    pub fn reply_to(&self) -> Option<&Destination> {
        self.reply_to.as_ref()
    }

    /// Sets the reply-to destination.
    pub fn set_reply_to(&mut self, destination: Destination) {
        self.reply_to = Some(destination);
    }

    /// Returns the outcome flag.
    #[must_use]
    pub fn state(&self) -> ContextState {
        self.state
    }

    /// Marks mediation of this message as stopped.
    pub fn terminate(&mut self) {
        self.state = ContextState::Terminated;
    }

    /// Returns true if this context carries a response.
    #[must_use]
    pub fn is_response(&self) -> bool {
        self.is_response
    }

    /// Returns the correlation key of the outstanding call, if any.
    #[must_use]
    pub fn correlation_key(&self) -> Option<&str> {
        self.correlation_key.as_deref()
    }

    /// Records the correlation key of an outbound call.
    pub fn set_correlation_key(&mut self, key: impl Into<String>) {
        self.correlation_key = Some(key.into());
    }

    /// Returns when the context was created.
    #[must_use]
    pub fn created_at(&self) -> Timestamp {
        self.created_at
    }

    /// Moves the live state out for suspension.
    ///
    /// `self` keeps only its message id and correlation key and is marked
    /// [`ContextState::Suspended`]; the returned value owns everything else.
    #[must_use]
    pub fn suspend(&mut self) -> Self {
        let husk = Self {
            message_id: self.message_id.clone(),
            properties: PropertyMap::new(),
            payload: Payload::Empty,
            destination: None,
            reply_to: None,
            state: ContextState::Suspended,
            is_response: false,
            correlation_key: self.correlation_key.clone(),
            created_at: self.created_at,
        };
        let mut live = std::mem::replace(self, husk);
        live.state = ContextState::Continuing;
        live
    }

    /// Folds a correlated response into this (resumed) context.
    ///
    /// The response payload replaces the current one and its properties are
    /// merged over the existing ones.
    pub fn absorb_response(&mut self, response: Self) {
        self.payload = response.payload;
        self.properties.merge(&response.properties);
        self.is_response = true;
        self.state = ContextState::Continuing;
    }
}
