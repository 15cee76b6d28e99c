use super::{EntityContext, EntityKind};
use crate::error::EntityError;
use async_trait::async_trait;
use std::fmt::{Debug, Display};
use std::hash::Hash;
use std::str::FromStr;

/// Identifier usable as an entity address.
///
/// The string form is what gets persisted; `FromStr` must parse it back so
/// reminders can be routed after a restart.
pub trait EntityId:
    Clone + Eq + Hash + Display + Debug + FromStr + Send + Sync + 'static
{
}

impl<T> EntityId for T where
    T: Clone + Eq + Hash + Display + Debug + FromStr + Send + Sync + 'static
{
}

/// Behaviour of one entity kind.
///
/// Every callback receives exclusive access to the instance and its
/// [`EntityContext`]; the host never runs two callbacks for the same ID at once.
#[async_trait]
pub trait Entity: Send + 'static {
    const KIND: EntityKind;

    type Id: EntityId;
    type Request: Send + 'static;
    type Reply: Send + 'static;

    /// Runs once per activation, before any request or reminder.
    async fn on_activate(&mut self, _ctx: &mut EntityContext) -> Result<(), EntityError> {
        Ok(())
    }

    async fn handle(
        &mut self,
        ctx: &mut EntityContext,
        request: Self::Request,
    ) -> Result<Self::Reply, EntityError>;

    async fn on_reminder(
        &mut self,
        _ctx: &mut EntityContext,
        _name: &str,
    ) -> Result<(), EntityError> {
        Ok(())
    }

    /// Runs before the in-memory instance is dropped. Durable state stays.
    async fn on_deactivate(&mut self, _ctx: &mut EntityContext) {}
}
