use rjit_session::{ClassId, ClientId};

/// One compilation request as handed over by the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilationRequest<P> {
    pub client_id: ClientId,
    /// Position of the request in its client's sequence, starting at 1
    pub seq_no: u32,
    /// Classes the client unloaded since its previous request
    pub unloaded_classes: Vec<ClassId>,
    pub payload: P,
}

impl<P> CompilationRequest<P> {
    pub fn new(client_id: ClientId, seq_no: u32, payload: P) -> Self {
        Self {
            client_id,
            seq_no,
            unloaded_classes: Vec::new(),
            payload,
        }
    }

    pub fn with_unloaded_classes(mut self, classes: Vec<ClassId>) -> Self {
        self.unloaded_classes = classes;
        self
    }
}
