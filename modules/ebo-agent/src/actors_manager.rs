use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use ebo_common::{ActorRequest, RequestId};

use crate::actor::{ActorDeps, EboActor, TerminateHook};
use crate::registry::EboMemoryRegistry;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ActorsManagerError {
    #[error("request {0} is already handled by an actor")]
    RequestAlreadyHandled(RequestId),
}

/// Directory of live actors, at most one per request id.
#[derive(Default)]
pub struct EboActorsManager {
    actors: HashMap<RequestId, Arc<EboActor>>,
}

impl EboActorsManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and register an actor with a fresh in-memory registry.
    pub fn create_actor(
        &mut self,
        actor_request: ActorRequest,
        deps: ActorDeps,
        on_terminate: TerminateHook,
    ) -> Result<Arc<EboActor>, ActorsManagerError> {
        if self.actors.contains_key(&actor_request.id) {
            return Err(ActorsManagerError::RequestAlreadyHandled(actor_request.id));
        }

        let request_id = actor_request.id.clone();
        info!(
            request_id = %request_id,
            chain_id = %actor_request.chain_id,
            epoch = actor_request.epoch,
            "Creating actor"
        );

        let actor = Arc::new(EboActor::new(
            actor_request,
            deps,
            Box::new(EboMemoryRegistry::new()),
            on_terminate,
        ));
        self.actors.insert(request_id, actor.clone());
        Ok(actor)
    }

    pub fn get_actor(&self, request_id: &RequestId) -> Option<Arc<EboActor>> {
        self.actors.get(request_id).cloned()
    }

    /// Remove the actor for `request_id`. Returns whether one was removed.
    pub fn delete_actor(&mut self, request_id: &RequestId) -> bool {
        match self.actors.remove(request_id) {
            Some(_) => {
                info!(%request_id, "Deleted actor");
                true
            }
            None => {
                warn!(%request_id, "No actor to delete");
                false
            }
        }
    }

    pub fn get_request_ids(&self) -> Vec<RequestId> {
        self.actors.keys().cloned().collect()
    }

    pub fn get_actors_requests(&self) -> Vec<ActorRequest> {
        self.actors
            .values()
            .map(|actor| actor.actor_request().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.actors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actors.is_empty()
    }
}
