//! Local ledger of the protocol entities one actor knows about.
//!
//! The registry is a cache of what the actor has observed on chain. Only
//! commands mutate it, so every mutation can be undone.

pub mod memory;

pub use memory::EboMemoryRegistry;

use ebo_common::{
    Dispute, DisputeId, DisputeStatus, Request, RequestId, RequestStatus, Response, ResponseId,
};

pub trait EboRegistry: Send {
    // --- Requests ---

    fn add_request(&mut self, request: Request);

    fn get_request(&self, id: &RequestId) -> Option<&Request>;

    fn get_requests(&self) -> Vec<&Request>;

    /// Set the status and return the previous one, `None` if the request is unknown.
    fn update_request_status(
        &mut self,
        id: &RequestId,
        status: RequestStatus,
    ) -> Option<RequestStatus>;

    fn remove_request(&mut self, id: &RequestId) -> Option<Request>;

    // --- Responses ---

    fn add_response(&mut self, response: Response);

    fn get_response(&self, id: &ResponseId) -> Option<&Response>;

    fn get_responses(&self) -> Vec<&Response>;

    /// Set the disputed flag and return the previous value.
    fn set_response_disputed(&mut self, id: &ResponseId, disputed: bool) -> Option<bool>;

    fn remove_response(&mut self, id: &ResponseId) -> Option<Response>;

    // --- Disputes ---

    fn add_dispute(&mut self, dispute: Dispute);

    fn get_dispute(&self, id: &DisputeId) -> Option<&Dispute>;

    fn get_disputes(&self) -> Vec<&Dispute>;

    /// The dispute raised against a response, if any.
    fn get_response_dispute(&self, response_id: &ResponseId) -> Option<&Dispute>;

    /// Set the status and return the previous one.
    fn update_dispute_status(
        &mut self,
        id: &DisputeId,
        status: DisputeStatus,
    ) -> Option<DisputeStatus>;

    fn remove_dispute(&mut self, id: &DisputeId) -> Option<Dispute>;
}
