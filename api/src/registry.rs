//! In-memory registry of pending forms.
//!
//! A form is either pending (stored here) or resolved (removed). Every
//! operation runs under a single mutex, so check-then-insert coalescing and
//! removals are atomic with respect to each other. Nothing here does I/O.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde_json::{Map, Value};
use uuid::Uuid;

use agentdesk_core::forms::{BATCH_SEPARATOR, Form, FormContent, FormKind, NewForm};

/// Retention discipline, fixed for the lifetime of a registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormDiscipline {
    /// Forms are scoped per origin. A Choice form with the same question as a
    /// pending one from the same origin is coalesced to the existing id.
    Session,
    /// One pool shared by every caller. No coalescing; beyond `max_pending`
    /// the oldest pending form is evicted.
    Pool { max_pending: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("form '{form_id}' is not pending (already resolved or expired)")]
    NotFound { form_id: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifyOutcome {
    pub form_id: String,
    /// True when an equivalent pending form was reused
    pub existing: bool,
}

/// A resolved form and the text its submission stands for.
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub form_id: String,
    pub kind: FormKind,
    pub text: String,
    /// Pass-through payload of Update forms
    pub update_data: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSubmission {
    pub combined_text: String,
    pub resolved_ids: Vec<String>,
    pub failed_ids: Vec<String>,
}

pub struct FormRegistry {
    discipline: FormDiscipline,
    max_age: TimeDelta,
    forms: Mutex<VecDeque<Form>>,
}

impl FormRegistry {
    pub fn new(discipline: FormDiscipline, max_age: Duration) -> Self {
        Self {
            discipline,
            max_age: TimeDelta::from_std(max_age).unwrap_or(TimeDelta::MAX),
            forms: Mutex::new(VecDeque::new()),
        }
    }

    pub fn discipline(&self) -> FormDiscipline {
        self.discipline
    }

    /// The origin filter a caller sees: its own forms in Session discipline,
    /// the whole pool otherwise.
    pub fn scope_for<'a>(&self, origin: &'a str) -> Option<&'a str> {
        match self.discipline {
            FormDiscipline::Session => Some(origin),
            FormDiscipline::Pool { .. } => None,
        }
    }

    fn store(&self) -> MutexGuard<'_, VecDeque<Form>> {
        // A panic elsewhere never leaves a half-written form behind, so the
        // data is still consistent after poisoning.
        self.forms.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stage a form for `origin`. Never fails.
    pub fn notify(&self, form: NewForm, origin: &str) -> NotifyOutcome {
        let now = Utc::now();
        let mut forms = self.store();
        sweep(&mut forms, now, self.max_age);

        if self.discipline == FormDiscipline::Session
            && form.kind() == FormKind::Choice
            && let Some(existing) = forms.iter().find(|f| {
                f.origin == origin && f.kind() == FormKind::Choice && f.question == form.question
            })
        {
            tracing::info!(
                form_id = %existing.form_id,
                origin,
                "Duplicate choice form coalesced"
            );
            return NotifyOutcome {
                form_id: existing.form_id.clone(),
                existing: true,
            };
        }

        if let FormDiscipline::Pool { max_pending } = self.discipline {
            while !forms.is_empty() && forms.len() >= max_pending.max(1) {
                if let Some(evicted) = forms.pop_front() {
                    tracing::warn!(
                        form_id = %evicted.form_id,
                        max_pending,
                        "Form pool full, evicted oldest pending form"
                    );
                }
            }
        }

        let form_id = format!("form_{}", Uuid::now_v7().simple());
        let kind = form.kind();
        forms.push_back(Form {
            form_id: form_id.clone(),
            question: form.question,
            message: form.message,
            content: form.content,
            created_at: now,
            origin: origin.to_string(),
        });
        tracing::info!(
            form_id = %form_id,
            kind = kind.code(),
            origin,
            pending = forms.len(),
            "Form staged"
        );

        NotifyOutcome {
            form_id,
            existing: false,
        }
    }

    /// Snapshot of pending forms in insertion order. Expired forms are swept
    /// first. Update forms in the snapshot are resolved by this read.
    pub fn list_pending(&self, origin: Option<&str>) -> Vec<Form> {
        let mut forms = self.store();
        sweep(&mut forms, Utc::now(), self.max_age);

        let snapshot: Vec<Form> = forms
            .iter()
            .filter(|f| in_scope(f, origin))
            .cloned()
            .collect();

        let before = forms.len();
        forms.retain(|f| !(in_scope(f, origin) && f.kind() == FormKind::Update));
        if forms.len() < before {
            tracing::debug!(delivered = before - forms.len(), "Update forms delivered");
        }

        snapshot
    }

    /// Number of pending forms visible in `origin`'s scope.
    pub fn pending_count(&self, origin: Option<&str>) -> usize {
        let mut forms = self.store();
        sweep(&mut forms, Utc::now(), self.max_age);
        forms.iter().filter(|f| in_scope(f, origin)).count()
    }

    /// True while a Choice form awaits an answer in `origin`'s scope.
    pub fn has_pending_choice(&self, origin: Option<&str>) -> bool {
        let mut forms = self.store();
        sweep(&mut forms, Utc::now(), self.max_age);
        forms
            .iter()
            .any(|f| in_scope(f, origin) && f.kind() == FormKind::Choice)
    }

    /// Resolve one form and compose its text. At most once per id.
    pub fn submit_one(
        &self,
        form_id: &str,
        values: &Map<String, Value>,
        origin: Option<&str>,
    ) -> Result<Submission, RegistryError> {
        let mut forms = self.store();
        sweep(&mut forms, Utc::now(), self.max_age);
        let submission = take(&mut forms, form_id, origin, values)?;
        tracing::info!(form_id, kind = submission.kind.code(), "Form submitted");
        Ok(submission)
    }

    /// Resolve several forms under one lock. Unknown ids are reported, not
    /// fatal. Non-empty renderings are joined in input order.
    pub fn submit_batch<'a, I>(&self, entries: I, origin: Option<&str>) -> BatchSubmission
    where
        I: IntoIterator<Item = (&'a str, &'a Map<String, Value>)>,
    {
        let mut forms = self.store();
        sweep(&mut forms, Utc::now(), self.max_age);

        let mut texts = Vec::new();
        let mut batch = BatchSubmission::default();
        for (form_id, values) in entries {
            match take(&mut forms, form_id, origin, values) {
                Ok(submission) => {
                    if !submission.text.is_empty() {
                        texts.push(submission.text);
                    }
                    batch.resolved_ids.push(submission.form_id);
                }
                Err(RegistryError::NotFound { form_id }) => batch.failed_ids.push(form_id),
            }
        }
        batch.combined_text = texts.join(BATCH_SEPARATOR);

        tracing::info!(
            resolved = batch.resolved_ids.len(),
            failed = batch.failed_ids.len(),
            "Form batch submitted"
        );
        batch
    }

    /// Remove every pending form in `origin`'s scope.
    pub fn clear_all(&self, origin: Option<&str>) -> usize {
        let mut forms = self.store();
        let before = forms.len();
        forms.retain(|f| !in_scope(f, origin));
        let removed = before - forms.len();
        tracing::info!(removed, "Pending forms cleared");
        removed
    }

    /// Remove forms older than `max_age`. Returns how many were removed.
    pub fn sweep_expired(&self, max_age: Duration) -> usize {
        let max_age = TimeDelta::from_std(max_age).unwrap_or(TimeDelta::MAX);
        let mut forms = self.store();
        sweep(&mut forms, Utc::now(), max_age)
    }

    /// Periodic sweep bounding memory between reads. Reads sweep on their
    /// own, so this is not needed for correctness.
    pub fn spawn_sweeper(self: Arc<Self>, every: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let removed = {
                    let mut forms = self.store();
                    sweep(&mut forms, Utc::now(), self.max_age)
                };
                if removed > 0 {
                    tracing::debug!(removed, "Background sweep removed expired forms");
                }
            }
        })
    }
}

fn in_scope(form: &Form, origin: Option<&str>) -> bool {
    origin.is_none_or(|origin| form.origin == origin)
}

fn sweep(forms: &mut VecDeque<Form>, now: DateTime<Utc>, max_age: TimeDelta) -> usize {
    let before = forms.len();
    forms.retain(|f| now.signed_duration_since(f.created_at) <= max_age);
    let removed = before - forms.len();
    if removed > 0 {
        tracing::info!(removed, "Expired forms swept");
    }
    removed
}

fn take(
    forms: &mut VecDeque<Form>,
    form_id: &str,
    origin: Option<&str>,
    values: &Map<String, Value>,
) -> Result<Submission, RegistryError> {
    let position = forms
        .iter()
        .position(|f| f.form_id == form_id && in_scope(f, origin))
        .ok_or_else(|| RegistryError::NotFound {
            form_id: form_id.to_string(),
        })?;
    let form = forms.remove(position).ok_or_else(|| RegistryError::NotFound {
        form_id: form_id.to_string(),
    })?;

    let kind = form.kind();
    let text = form.content.render(values);
    let update_data = match form.content {
        FormContent::Update { update_data } => Some(update_data),
        _ => None,
    };
    Ok(Submission {
        form_id: form.form_id,
        kind,
        text,
        update_data,
    })
}
