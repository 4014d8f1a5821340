//! In-memory backend that records every call, for orchestration tests.
//!
//! ```ignore
//! let backend = FakeBackend::new().with_tenant("7", "Acme U").with_user(42, "alice@example.org");
//! let service = ProvisioningService::new(backend.connector(), ProvisioningConfig::default());
//! // ...
//! assert_eq!(backend.calls(), vec![Call::Connect, ...]);
//! ```
#![allow(dead_code)]

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use http::StatusCode;

use super::{
    BackendConnector, BackendError, BackendResult, BackendSession, TenantId, TenantPage,
    TenantRef, UserId, UserRecord, client::tenant_slug,
};

/// One recorded backend interaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Connect,
    ListTenants { limit: u32, offset: u64 },
    CreateTenant(String),
    GetUser(UserId),
    UpdateUser { id: String, note: String },
    AddUserToTenant { tenant_id: TenantId, email: String },
}

/// Operation a [`Fault`] is injected into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    Connect,
    ListTenants,
    CreateTenant,
    GetUser,
    UpdateUser,
    AddUserToTenant,
}

/// Failure returned instead of performing a step.
#[derive(Debug, Clone)]
pub enum Fault {
    Unauthenticated,
    NotFound,
    Conflict,
    Unavailable,
    /// Another writer creates the tenant first, then the call reports a conflict.
    CreatedConcurrently,
}

impl Fault {
    fn into_error(self) -> BackendError {
        match self {
            Fault::Unauthenticated => BackendError::Unauthenticated("invalid token".into()),
            Fault::NotFound => BackendError::NotFound("object does not exist".into()),
            Fault::Conflict | Fault::CreatedConcurrently => {
                BackendError::Conflict("object already exists".into())
            }
            Fault::Unavailable => BackendError::Status {
                status: StatusCode::SERVICE_UNAVAILABLE,
                message: "backend unavailable".into(),
            },
        }
    }
}

#[derive(Default)]
struct State {
    tenants: Vec<TenantRef>,
    users: HashMap<i64, UserRecord>,
    calls: Vec<Call>,
    faults: HashMap<Step, Fault>,
    next_tenant_id: u64,
    email_after_update: Option<String>,
    report_total: bool,
    latency: Option<Duration>,
}

/// Shared handle over the fake backend's state.
#[derive(Clone)]
pub struct FakeBackend {
    state: Arc<Mutex<State>>,
    page_size: u32,
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeBackend {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                next_tenant_id: 100,
                report_total: true,
                ..Default::default()
            })),
            page_size: 100,
        }
    }

    pub fn with_tenant(self, id: &str, name: &str) -> Self {
        self.state.lock().unwrap().tenants.push(TenantRef {
            id: TenantId(id.to_string()),
            name: name.to_string(),
        });
        self
    }

    pub fn with_user(self, id: i64, email: &str) -> Self {
        self.state.lock().unwrap().users.insert(
            id,
            UserRecord {
                id: id.to_string(),
                email: email.to_string(),
                note: String::new(),
                extra: serde_json::Map::new(),
            },
        );
        self
    }

    pub fn with_fault(self, step: Step, fault: Fault) -> Self {
        self.state.lock().unwrap().faults.insert(step, fault);
        self
    }

    /// Rewrite the stored email whenever a user is updated.
    pub fn with_email_after_update(self, email: &str) -> Self {
        self.state.lock().unwrap().email_after_update = Some(email.to_string());
        self
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    /// Omit the total count from tenant listings.
    pub fn without_total(self) -> Self {
        self.state.lock().unwrap().report_total = false;
        self
    }

    /// Sleep before every call so concurrent requests interleave.
    pub fn with_latency(self, latency: Duration) -> Self {
        self.state.lock().unwrap().latency = Some(latency);
        self
    }

    pub fn connector(&self) -> Arc<dyn BackendConnector> {
        Arc::new(self.clone())
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn tenants(&self) -> Vec<TenantRef> {
        self.state.lock().unwrap().tenants.clone()
    }

    pub fn user(&self, id: i64) -> Option<UserRecord> {
        self.state.lock().unwrap().users.get(&id).cloned()
    }

    pub fn count(&self, matches: impl Fn(&Call) -> bool) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|c| matches(c))
            .count()
    }

    async fn enter(&self, step: Step, call: Call) -> BackendResult<()> {
        let latency = self.state.lock().unwrap().latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.state.lock().unwrap();
        state.calls.push(call);
        match state.faults.get(&step).cloned() {
            Some(fault) => Err(fault.into_error()),
            None => Ok(()),
        }
    }

    fn push_tenant(state: &mut State, name: &str) -> TenantRef {
        state.next_tenant_id += 1;
        let tenant = TenantRef {
            id: TenantId(state.next_tenant_id.to_string()),
            name: name.to_string(),
        };
        state.tenants.push(tenant.clone());
        tenant
    }
}

#[async_trait]
impl BackendConnector for FakeBackend {
    async fn connect(&self) -> BackendResult<Box<dyn BackendSession>> {
        self.enter(Step::Connect, Call::Connect).await?;
        Ok(Box::new(self.clone()))
    }

    fn page_size(&self) -> u32 {
        self.page_size
    }
}

#[async_trait]
impl BackendSession for FakeBackend {
    async fn list_tenants(&self, limit: u32, offset: u64) -> BackendResult<TenantPage> {
        self.enter(Step::ListTenants, Call::ListTenants { limit, offset })
            .await?;

        let state = self.state.lock().unwrap();
        let tenants = state
            .tenants
            .iter()
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect();
        Ok(TenantPage {
            tenants,
            total: state.report_total.then_some(state.tenants.len() as u64),
        })
    }

    async fn create_tenant(&self, name: &str) -> BackendResult<TenantRef> {
        let latency = self.state.lock().unwrap().latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::CreateTenant(name.to_string()));
        match state.faults.get(&Step::CreateTenant).cloned() {
            Some(Fault::CreatedConcurrently) => {
                Self::push_tenant(&mut state, name);
                Err(Fault::CreatedConcurrently.into_error())
            }
            Some(fault) => Err(fault.into_error()),
            None => {
                // Internal names are unique, as in ChirpStack.
                let slug = tenant_slug(name);
                if state.tenants.iter().any(|t| tenant_slug(&t.name) == slug) {
                    return Err(BackendError::Conflict("object already exists".into()));
                }
                Ok(Self::push_tenant(&mut state, name))
            }
        }
    }

    async fn get_user(&self, user_id: UserId) -> BackendResult<UserRecord> {
        self.enter(Step::GetUser, Call::GetUser(user_id)).await?;

        self.state
            .lock()
            .unwrap()
            .users
            .get(&user_id.0)
            .cloned()
            .ok_or_else(|| BackendError::NotFound("object does not exist".into()))
    }

    async fn update_user(&self, user: &UserRecord) -> BackendResult<()> {
        self.enter(
            Step::UpdateUser,
            Call::UpdateUser {
                id: user.id.clone(),
                note: user.note.clone(),
            },
        )
        .await?;

        let mut state = self.state.lock().unwrap();
        let mut stored = user.clone();
        if let Some(email) = state.email_after_update.clone() {
            stored.email = email;
        }
        if let Ok(id) = user.id.parse() {
            state.users.insert(id, stored);
        }
        Ok(())
    }

    async fn add_user_to_tenant(&self, tenant_id: &TenantId, email: &str) -> BackendResult<()> {
        self.enter(
            Step::AddUserToTenant,
            Call::AddUserToTenant {
                tenant_id: tenant_id.clone(),
                email: email.to_string(),
            },
        )
        .await
    }
}
