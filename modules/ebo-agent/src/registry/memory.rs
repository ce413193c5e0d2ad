use std::collections::HashMap;

use ebo_common::{
    Dispute, DisputeId, DisputeStatus, Request, RequestId, RequestStatus, Response, ResponseId,
};

use super::EboRegistry;

/// HashMap-backed registry. One per actor, never shared.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EboMemoryRegistry {
    requests: HashMap<RequestId, Request>,
    responses: HashMap<ResponseId, Response>,
    disputes: HashMap<DisputeId, Dispute>,
    /// response id → dispute id
    response_disputes: HashMap<ResponseId, DisputeId>,
}

impl EboMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EboRegistry for EboMemoryRegistry {
    fn add_request(&mut self, request: Request) {
        self.requests.insert(request.id.clone(), request);
    }

    fn get_request(&self, id: &RequestId) -> Option<&Request> {
        self.requests.get(id)
    }

    fn get_requests(&self) -> Vec<&Request> {
        self.requests.values().collect()
    }

    fn update_request_status(
        &mut self,
        id: &RequestId,
        status: RequestStatus,
    ) -> Option<RequestStatus> {
        let request = self.requests.get_mut(id)?;
        Some(std::mem::replace(&mut request.status, status))
    }

    fn remove_request(&mut self, id: &RequestId) -> Option<Request> {
        self.requests.remove(id)
    }

    fn add_response(&mut self, response: Response) {
        self.responses.insert(response.id.clone(), response);
    }

    fn get_response(&self, id: &ResponseId) -> Option<&Response> {
        self.responses.get(id)
    }

    fn get_responses(&self) -> Vec<&Response> {
        self.responses.values().collect()
    }

    fn set_response_disputed(&mut self, id: &ResponseId, disputed: bool) -> Option<bool> {
        let response = self.responses.get_mut(id)?;
        Some(std::mem::replace(&mut response.disputed, disputed))
    }

    fn remove_response(&mut self, id: &ResponseId) -> Option<Response> {
        self.responses.remove(id)
    }

    fn add_dispute(&mut self, dispute: Dispute) {
        self.response_disputes
            .insert(dispute.response_id.clone(), dispute.id.clone());
        self.disputes.insert(dispute.id.clone(), dispute);
    }

    fn get_dispute(&self, id: &DisputeId) -> Option<&Dispute> {
        self.disputes.get(id)
    }

    fn get_disputes(&self) -> Vec<&Dispute> {
        self.disputes.values().collect()
    }

    fn get_response_dispute(&self, response_id: &ResponseId) -> Option<&Dispute> {
        self.response_disputes
            .get(response_id)
            .and_then(|dispute_id| self.disputes.get(dispute_id))
    }

    fn update_dispute_status(
        &mut self,
        id: &DisputeId,
        status: DisputeStatus,
    ) -> Option<DisputeStatus> {
        let dispute = self.disputes.get_mut(id)?;
        Some(std::mem::replace(&mut dispute.status, status))
    }

    fn remove_dispute(&mut self, id: &DisputeId) -> Option<Dispute> {
        let dispute = self.disputes.remove(id)?;
        if self.response_disputes.get(&dispute.response_id) == Some(id) {
            self.response_disputes.remove(&dispute.response_id);
        }
        Some(dispute)
    }
}
