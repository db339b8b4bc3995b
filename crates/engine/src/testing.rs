//! Test doubles for the collaborator traits

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use rcgen::{CertificateParams, KeyPair};

use certbind_common::{Identifier, Target};

use crate::acme::{
    Authorization, AuthorizationStatus, CertificateChain, Challenge, ChallengeStatus,
    ChallengeType, ClientError, IssuanceClient, Order, OrderStatus, Problem,
};
use crate::csr::SigningRequest;
use crate::renewal::{RenewResult, Renewal};
use crate::store::{RenewalStore, StorageError};
use crate::validation::{ChallengeDetails, ValidationError, ValidationPlugin};

/// Self-signed chain and key covering `names`
pub fn self_signed(names: &[&str]) -> (String, String) {
    let key = KeyPair::generate().unwrap();
    let params =
        CertificateParams::new(names.iter().map(|n| n.to_string()).collect::<Vec<_>>()).unwrap();
    let cert = params.self_signed(&key).unwrap();
    (cert.pem(), key.serialize_pem())
}

/// Authorization for `value` offering one pending http-01 challenge
pub fn authorization(value: &str, status: AuthorizationStatus) -> Authorization {
    Authorization {
        url: format!("https://ca.test/authz/{value}"),
        identifier: Identifier::dns(value),
        status,
        wildcard: false,
        challenges: vec![Challenge {
            kind: ChallengeType::Http01,
            url: format!("https://ca.test/chall/{value}"),
            token: format!("token-{value}"),
            status: ChallengeStatus::Pending,
            key_authorization: Some(format!("token-{value}.account")),
            error: None,
        }],
    }
}

struct ClientState {
    order_status: OrderStatus,
    order_error: Option<Problem>,
    authorizations: Vec<Authorization>,
    script: Vec<ChallengeStatus>,
    cursor: usize,
    challenge_error: Option<Problem>,
    current: Option<Challenge>,
}

/// Scripted CA
///
/// The answer gets the first scripted challenge status and each poll the
/// next one; the last status repeats once the script runs out.
pub struct FakeClient {
    state: Mutex<ClientState>,
    panic_on_order: AtomicBool,
    orders: AtomicUsize,
    issued: AtomicUsize,
    authorization_fetches: AtomicUsize,
    answers: AtomicUsize,
    challenge_polls: AtomicUsize,
}

impl FakeClient {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ClientState {
                order_status: OrderStatus::Pending,
                order_error: None,
                authorizations: Vec::new(),
                script: vec![ChallengeStatus::Valid],
                cursor: 0,
                challenge_error: None,
                current: None,
            }),
            panic_on_order: AtomicBool::new(false),
            orders: AtomicUsize::new(0),
            issued: AtomicUsize::new(0),
            authorization_fetches: AtomicUsize::new(0),
            answers: AtomicUsize::new(0),
            challenge_polls: AtomicUsize::new(0),
        }
    }

    /// Listed on every order; replaces an authorization with the same URL
    pub fn add_authorization(&self, authorization: Authorization) {
        let mut state = self.state.lock();
        state.authorizations.retain(|a| a.url != authorization.url);
        state.authorizations.push(authorization);
    }

    pub fn script_challenge(&self, statuses: &[ChallengeStatus]) {
        let mut state = self.state.lock();
        state.script = statuses.to_vec();
        state.cursor = 0;
    }

    pub fn set_challenge_error(&self, problem: Problem) {
        self.state.lock().challenge_error = Some(problem);
    }

    pub fn set_order_status(&self, status: OrderStatus, error: Option<Problem>) {
        let mut state = self.state.lock();
        state.order_status = status;
        state.order_error = error;
    }

    pub fn panic_on_order(&self) {
        self.panic_on_order.store(true, Ordering::SeqCst);
    }

    pub fn orders(&self) -> usize {
        self.orders.load(Ordering::SeqCst)
    }

    pub fn issued(&self) -> usize {
        self.issued.load(Ordering::SeqCst)
    }

    pub fn authorization_fetches(&self) -> usize {
        self.authorization_fetches.load(Ordering::SeqCst)
    }

    pub fn answers(&self) -> usize {
        self.answers.load(Ordering::SeqCst)
    }

    pub fn challenge_polls(&self) -> usize {
        self.challenge_polls.load(Ordering::SeqCst)
    }

    fn next_challenge(&self, state: &mut ClientState, challenge: &Challenge) -> Challenge {
        let index = state.cursor.min(state.script.len().saturating_sub(1));
        let status = state
            .script
            .get(index)
            .copied()
            .unwrap_or(ChallengeStatus::Valid);
        state.cursor += 1;

        let mut next = challenge.clone();
        next.status = status;
        next.error = state.challenge_error.clone();
        state.current = Some(next.clone());
        next
    }
}

#[async_trait]
impl IssuanceClient for FakeClient {
    async fn create_order(&self, identifiers: &[Identifier]) -> Result<Order, ClientError> {
        if self.panic_on_order.load(Ordering::SeqCst) {
            panic!("order endpoint exploded");
        }
        let count = self.orders.fetch_add(1, Ordering::SeqCst) + 1;
        let state = self.state.lock();
        Ok(Order {
            url: format!("https://ca.test/order/{count}"),
            status: state.order_status,
            identifiers: identifiers.to_vec(),
            authorizations: state.authorizations.iter().map(|a| a.url.clone()).collect(),
            finalize: format!("https://ca.test/order/{count}/finalize"),
            certificate: None,
            error: state.order_error.clone(),
        })
    }

    async fn get_authorization(&self, url: &str) -> Result<Authorization, ClientError> {
        self.authorization_fetches.fetch_add(1, Ordering::SeqCst);
        self.state
            .lock()
            .authorizations
            .iter()
            .find(|a| a.url == url)
            .cloned()
            .ok_or_else(|| ClientError::Protocol(format!("no authorization at {url}")))
    }

    async fn answer_challenge(&self, challenge: &Challenge) -> Result<Challenge, ClientError> {
        self.answers.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock();
        Ok(self.next_challenge(&mut state, challenge))
    }

    async fn get_challenge(&self, url: &str) -> Result<Challenge, ClientError> {
        self.challenge_polls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock();
        let current = state
            .current
            .clone()
            .filter(|c| c.url == url)
            .ok_or_else(|| ClientError::Protocol(format!("no challenge at {url}")))?;
        Ok(self.next_challenge(&mut state, &current))
    }

    async fn request_certificate(
        &self,
        _csr: &SigningRequest,
        order: &Order,
    ) -> Result<CertificateChain, ClientError> {
        self.issued.fetch_add(1, Ordering::SeqCst);
        let names: Vec<&str> = order.identifiers.iter().map(Identifier::value).collect();
        let (pem, _key) = self_signed(&names);
        Ok(CertificateChain { pem })
    }
}

/// Validation plugin that records what it was asked to do
pub struct FakeValidation {
    kind: ChallengeType,
    fail: bool,
    reject_wildcards: bool,
    prepared: Mutex<Vec<ChallengeDetails>>,
    cleaned: Mutex<Vec<ChallengeDetails>>,
}

impl FakeValidation {
    pub fn with_type(kind: ChallengeType) -> Self {
        Self {
            kind,
            fail: false,
            reject_wildcards: false,
            prepared: Mutex::new(Vec::new()),
            cleaned: Mutex::new(Vec::new()),
        }
    }

    pub fn http() -> Self {
        Self::with_type(ChallengeType::Http01)
    }

    /// Every preparation fails
    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    pub fn rejecting_wildcards(mut self) -> Self {
        self.reject_wildcards = true;
        self
    }

    pub fn prepared(&self) -> Vec<ChallengeDetails> {
        self.prepared.lock().clone()
    }

    pub fn cleanups(&self) -> usize {
        self.cleaned.lock().len()
    }

    /// Details passed to each cleanup, in call order
    pub fn cleaned(&self) -> Vec<ChallengeDetails> {
        self.cleaned.lock().clone()
    }
}

#[async_trait]
impl ValidationPlugin for FakeValidation {
    fn challenge_type(&self) -> ChallengeType {
        self.kind.clone()
    }

    fn can_validate(&self, target: &Target) -> bool {
        !(self.reject_wildcards && target.has_wildcard())
    }

    async fn prepare_challenge(&self, details: &ChallengeDetails) -> Result<(), ValidationError> {
        if self.fail {
            return Err(ValidationError::Other("proof could not be placed".to_string()));
        }
        self.prepared.lock().push(details.clone());
        Ok(())
    }

    async fn cleanup(&self, details: &ChallengeDetails) -> Result<(), ValidationError> {
        self.cleaned.lock().push(details.clone());
        Ok(())
    }
}

/// Renewal store kept in memory
#[derive(Default)]
pub struct MemoryRenewalStore {
    renewals: Mutex<Vec<Renewal>>,
    saved: AtomicUsize,
}

impl MemoryRenewalStore {
    pub fn insert(&self, renewal: Renewal) {
        self.renewals.lock().push(renewal);
    }

    /// Results persisted so far
    pub fn saved(&self) -> usize {
        self.saved.load(Ordering::SeqCst)
    }
}

impl RenewalStore for MemoryRenewalStore {
    fn load_all(&self) -> Result<Vec<Renewal>, StorageError> {
        Ok(self.renewals.lock().clone())
    }

    fn save(&self, renewal: &mut Renewal, result: RenewResult) -> Result<(), StorageError> {
        renewal.history.push(result);
        self.saved.fetch_add(1, Ordering::SeqCst);
        let mut renewals = self.renewals.lock();
        match renewals.iter_mut().find(|r| r.id == renewal.id) {
            Some(stored) => *stored = renewal.clone(),
            None => renewals.push(renewal.clone()),
        }
        Ok(())
    }
}
