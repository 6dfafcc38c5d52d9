//! Review Session State
//!
//! In-memory, user-editable set of line items for one uploaded document,
//! from intake until publish.

use aduana_models::{
    Classification, ClassificationRequest, FolderId, LineItem, LineItemPatch, PublishReceipt,
    PublishRequest, PublishTemplate,
};
use aduana_utils::{validate_document_name, AduanaError, AduanaResult, ReconciliationReport};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::classifier::Classifier;
use crate::publisher::Publisher;

/// Session states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Items can be edited, deleted and reclassified
    Editable,
    /// A publish call is in flight
    Publishing,
    /// Items were written to the destination
    Published,
}

impl SessionState {
    /// Check if transition is valid
    pub fn can_transition_to(&self, target: SessionState) -> bool {
        use SessionState::*;

        match (self, target) {
            (Editable, Publishing) => true,

            // Failed publish returns to editing
            (Publishing, Editable) => true,
            (Publishing, Published) => true,

            (Published, _) => false,

            _ => false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Published)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Editable => write!(f, "editable"),
            Self::Publishing => write!(f, "publishing"),
            Self::Published => write!(f, "published"),
        }
    }
}

/// What happened to a reclassification request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ReclassifyOutcome {
    /// The classification was written to the item
    Applied { item: LineItem },
    /// No classification was produced; the item is unchanged
    Failed { item_id: String, reason: String },
    /// A newer request or a name edit superseded this one
    Stale { item_id: String },
    /// Held until the in-flight publish finishes
    Deferred { item_id: String },
    NotFound { item_id: String },
}

impl ReclassifyOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Applied { .. } => "applied",
            Self::Failed { .. } => "failed",
            Self::Stale { .. } => "stale",
            Self::Deferred { .. } => "deferred",
            Self::NotFound { .. } => "not_found",
        }
    }
}

/// Result of asking a session to start a reclassification.
#[derive(Debug, Clone)]
pub enum ReclassifyStart {
    Ready {
        ticket: u64,
        request: ClassificationRequest,
    },
    Rejected(ReclassifyOutcome),
}

#[derive(Debug)]
struct PendingResult {
    item_id: String,
    ticket: u64,
    result: AduanaResult<Classification>,
}

/// Serializable snapshot of a session
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub id: Uuid,
    pub document_name: String,
    pub folder_id: Option<FolderId>,
    pub state: SessionState,
    pub items: Vec<LineItem>,
    pub report: ReconciliationReport,
    pub warnings: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct ReviewSession {
    id: Uuid,
    document_name: String,
    folder_id: Option<FolderId>,
    items: Vec<LineItem>,
    state: SessionState,
    report: ReconciliationReport,
    warnings: Vec<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    max_tariff_digits: usize,
    /// Last reclassification ticket handed out.
    last_ticket: u64,
    /// Per item, results with a ticket at or below this value are stale.
    intent_floor: HashMap<String, u64>,
    deferred: Vec<PendingResult>,
}

impl ReviewSession {
    /// Colliding item ids are replaced with fresh ones and reported as
    /// warnings.
    pub fn new(document_name: impl Into<String>, mut items: Vec<LineItem>, max_tariff_digits: usize) -> Self {
        let id = Uuid::new_v4();
        let mut warnings = Vec::new();
        let mut seen = HashSet::new();

        for item in &mut items {
            if !seen.insert(item.id.clone()) {
                let replacement = Uuid::new_v4().to_string();
                tracing::warn!(session_id = %id, item_id = %item.id, %replacement, "Duplicate item id");
                warnings.push(format!("Duplicate item id '{}' renamed to '{}'", item.id, replacement));
                item.id = replacement.clone();
                seen.insert(replacement);
            }
        }

        let now = Utc::now();
        Self {
            id,
            document_name: document_name.into(),
            folder_id: None,
            items,
            state: SessionState::Editable,
            report: ReconciliationReport::default(),
            warnings,
            created_at: now,
            updated_at: now,
            max_tariff_digits,
            last_ticket: 0,
            intent_floor: HashMap::new(),
            deferred: Vec::new(),
        }
    }

    pub fn with_folder(mut self, folder_id: FolderId) -> Self {
        self.folder_id = Some(folder_id);
        self
    }

    pub fn with_report(mut self, report: ReconciliationReport, warnings: Vec<String>) -> Self {
        self.report = report;
        self.warnings.extend(warnings);
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn items(&self) -> &[LineItem] {
        &self.items
    }

    pub fn item(&self, item_id: &str) -> Option<&LineItem> {
        self.items.iter().find(|item| item.id == item_id)
    }

    pub fn view(&self) -> SessionView {
        SessionView {
            id: self.id,
            document_name: self.document_name.clone(),
            folder_id: self.folder_id.clone(),
            state: self.state,
            items: self.items.clone(),
            report: self.report.clone(),
            warnings: self.warnings.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    fn ensure_editable(&self) -> AduanaResult<()> {
        match self.state {
            SessionState::Editable => Ok(()),
            SessionState::Publishing => Err(AduanaError::session_busy(self.id)),
            SessionState::Published => Err(AduanaError::validation(
                "session",
                "Session is already published",
            )),
        }
    }

    fn transition(&mut self, target: SessionState) {
        debug_assert!(self.state.can_transition_to(target), "{} -> {}", self.state, target);
        tracing::debug!(session_id = %self.id, from = %self.state, to = %target, "Session transition");
        self.state = target;
        self.touch();
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Merge user fields into an item. Returns `None` when the id is unknown.
    pub fn apply_edit(&mut self, item_id: &str, patch: &LineItemPatch) -> AduanaResult<Option<&LineItem>> {
        self.ensure_editable()?;

        let max_digits = self.max_tariff_digits;
        let Some(index) = self.items.iter().position(|item| item.id == item_id) else {
            return Ok(None);
        };

        let effect = self.items[index].apply_patch(patch, max_digits);
        if effect.display_name_changed {
            // Classifications requested before this edit no longer match
            // what the user typed.
            let floor = self.intent_floor.entry(item_id.to_string()).or_default();
            *floor = (*floor).max(self.last_ticket);
        }
        if effect.changed {
            self.touch();
        }

        Ok(self.items.get(index))
    }

    /// Remove an item. Returns whether it existed.
    pub fn delete_item(&mut self, item_id: &str) -> AduanaResult<bool> {
        self.ensure_editable()?;

        let before = self.items.len();
        self.items.retain(|item| item.id != item_id);
        self.intent_floor.remove(item_id);

        let removed = self.items.len() != before;
        if removed {
            self.touch();
        }
        Ok(removed)
    }

    /// Issue a ticket and build the classification request for an item.
    pub fn begin_reclassify(&mut self, item_id: &str) -> ReclassifyStart {
        if self.state.is_terminal() {
            return ReclassifyStart::Rejected(ReclassifyOutcome::Failed {
                item_id: item_id.to_string(),
                reason: "Session is already published".to_string(),
            });
        }

        let Some(item) = self.item(item_id) else {
            return ReclassifyStart::Rejected(ReclassifyOutcome::NotFound {
                item_id: item_id.to_string(),
            });
        };
        let Some(image) = item.image.clone() else {
            return ReclassifyStart::Rejected(ReclassifyOutcome::Failed {
                item_id: item_id.to_string(),
                reason: "Item has no image to classify".to_string(),
            });
        };
        let name_hint = Some(item.display_name.trim().to_string()).filter(|n| !n.is_empty());

        self.last_ticket += 1;
        ReclassifyStart::Ready {
            ticket: self.last_ticket,
            request: ClassificationRequest { image, name_hint },
        }
    }

    /// Hand back a classification result for a ticket.
    pub fn complete_reclassify(
        &mut self,
        item_id: &str,
        ticket: u64,
        result: AduanaResult<Classification>,
    ) -> ReclassifyOutcome {
        match self.state {
            SessionState::Editable => self.apply_result(item_id, ticket, result),
            SessionState::Publishing => {
                self.deferred.push(PendingResult {
                    item_id: item_id.to_string(),
                    ticket,
                    result,
                });
                ReclassifyOutcome::Deferred {
                    item_id: item_id.to_string(),
                }
            }
            SessionState::Published => ReclassifyOutcome::Stale {
                item_id: item_id.to_string(),
            },
        }
    }

    fn apply_result(
        &mut self,
        item_id: &str,
        ticket: u64,
        result: AduanaResult<Classification>,
    ) -> ReclassifyOutcome {
        let floor = self.intent_floor.get(item_id).copied().unwrap_or(0);
        if ticket <= floor {
            return ReclassifyOutcome::Stale {
                item_id: item_id.to_string(),
            };
        }

        let max_digits = self.max_tariff_digits;
        let Some(item) = self.items.iter_mut().find(|item| item.id == item_id) else {
            return ReclassifyOutcome::NotFound {
                item_id: item_id.to_string(),
            };
        };

        let outcome = match result {
            Ok(classification) if item.apply_classification(&classification, max_digits) => {
                ReclassifyOutcome::Applied { item: item.clone() }
            }
            Ok(_) => ReclassifyOutcome::Failed {
                item_id: item_id.to_string(),
                reason: "Classification returned no tariff code".to_string(),
            },
            Err(e) => ReclassifyOutcome::Failed {
                item_id: item_id.to_string(),
                reason: e.to_string(),
            },
        };

        self.intent_floor.insert(item_id.to_string(), ticket);
        if matches!(outcome, ReclassifyOutcome::Applied { .. }) {
            self.touch();
        }
        outcome
    }

    /// Ordered copy of the items, or `EmptySession`.
    pub fn snapshot_for_publish(&self) -> AduanaResult<Vec<LineItem>> {
        if self.items.is_empty() {
            return Err(AduanaError::EmptySession);
        }
        Ok(self.items.clone())
    }

    /// Validate the publish target and enter `Publishing`.
    ///
    /// Overrides replace the document name and folder stored on the session.
    pub fn begin_publish(
        &mut self,
        template: PublishTemplate,
        document_name: Option<String>,
        folder_id: Option<FolderId>,
    ) -> AduanaResult<PublishRequest> {
        self.ensure_editable()?;
        let items = self.snapshot_for_publish()?;

        let document_name = validate_document_name(
            document_name.as_deref().unwrap_or(&self.document_name),
        )?;
        let folder_id = folder_id
            .or_else(|| self.folder_id.clone())
            .ok_or_else(|| AduanaError::validation("folder_url", "A drive folder is required to publish"))?;

        self.document_name = document_name.clone();
        self.folder_id = Some(folder_id.clone());
        self.transition(SessionState::Publishing);

        Ok(PublishRequest {
            document_name,
            folder_id,
            template,
            items,
        })
    }

    /// Leave `Publishing`. On failure, results that arrived meanwhile are
    /// applied and returned.
    pub fn finish_publish(&mut self, succeeded: bool) -> Vec<ReclassifyOutcome> {
        if self.state != SessionState::Publishing {
            return Vec::new();
        }

        if succeeded {
            self.transition(SessionState::Published);
            self.deferred.clear();
            return Vec::new();
        }

        self.transition(SessionState::Editable);
        let pending = std::mem::take(&mut self.deferred);
        pending
            .into_iter()
            .map(|p| self.apply_result(&p.item_id, p.ticket, p.result))
            .collect()
    }
}

/// Publish parameters supplied by the client
#[derive(Debug, Clone)]
pub struct PublishOptions {
    pub template: PublishTemplate,
    pub document_name: Option<String>,
    pub folder_id: Option<FolderId>,
}

/// Shared handle to one session with its collaborators.
#[derive(Clone)]
pub struct SessionHandle {
    id: Uuid,
    session: Arc<Mutex<ReviewSession>>,
    classifier: Arc<dyn Classifier>,
    publisher: Arc<dyn Publisher>,
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl SessionHandle {
    pub fn new(
        session: ReviewSession,
        classifier: Arc<dyn Classifier>,
        publisher: Arc<dyn Publisher>,
    ) -> Self {
        Self {
            id: session.id(),
            session: Arc::new(Mutex::new(session)),
            classifier,
            publisher,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub async fn view(&self) -> SessionView {
        self.session.lock().await.view()
    }

    pub async fn apply_edit(&self, item_id: &str, patch: &LineItemPatch) -> AduanaResult<Option<LineItem>> {
        let mut session = self.session.lock().await;
        Ok(session.apply_edit(item_id, patch)?.cloned())
    }

    pub async fn delete_item(&self, item_id: &str) -> AduanaResult<bool> {
        self.session.lock().await.delete_item(item_id)
    }

    /// Classify one item again. The session lock is released while the
    /// classifier runs; failures are returned as outcomes.
    pub async fn reclassify(&self, item_id: &str) -> ReclassifyOutcome {
        let start = self.session.lock().await.begin_reclassify(item_id);
        let (ticket, request) = match start {
            ReclassifyStart::Ready { ticket, request } => (ticket, request),
            ReclassifyStart::Rejected(outcome) => return outcome,
        };

        tracing::info!(session_id = %self.id, item_id, ticket, "Reclassifying item");
        let result = self.classifier.classify(&request).await;
        if let Err(e) = &result {
            tracing::warn!(session_id = %self.id, item_id, ticket, error = %e, "Classification failed");
        }

        let outcome = self
            .session
            .lock()
            .await
            .complete_reclassify(item_id, ticket, result);
        tracing::info!(session_id = %self.id, item_id, ticket, outcome = outcome.label(), "Reclassification finished");
        outcome
    }

    /// Publish the current items. Validation and the empty check happen
    /// before the publisher is called; no retry on failure.
    pub async fn publish(&self, options: PublishOptions) -> AduanaResult<PublishReceipt> {
        let request = self.session.lock().await.begin_publish(
            options.template,
            options.document_name,
            options.folder_id,
        )?;

        let result = self.publisher.publish(&request).await;

        let replayed = self.session.lock().await.finish_publish(result.is_ok());
        for outcome in &replayed {
            tracing::info!(session_id = %self.id, outcome = outcome.label(), "Applied deferred reclassification");
        }

        match &result {
            Ok(receipt) => tracing::info!(
                session_id = %self.id,
                rows = receipt.rows_written,
                sheet_url = %receipt.sheet_url,
                "Session published"
            ),
            Err(e) => tracing::warn!(session_id = %self.id, error = %e, "Publish failed"),
        }
        result
    }
}

/// Live sessions by id
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<Uuid, SessionHandle>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, handle: SessionHandle) -> Uuid {
        let id = handle.id();
        self.sessions.write().await.insert(id, handle);
        id
    }

    pub async fn get(&self, id: Uuid) -> AduanaResult<SessionHandle> {
        self.sessions
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| AduanaError::not_found(format!("session {}", id)))
    }

    pub async fn remove(&self, id: Uuid) -> Option<SessionHandle> {
        self.sessions.write().await.remove(&id)
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aduana_models::{ImageRef, QuantityFields, SupplementaryText, TariffCode};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn item(id: &str, name: &str, with_image: bool) -> LineItem {
        LineItem {
            id: id.into(),
            image: if with_image { ImageRef::inline("iVBORw0KGgo") } else { None },
            display_name: name.into(),
            tariff_code: TariffCode::sanitize("8518", 10),
            classification_confidence: Some(0.5),
            classification_reason: "inicial".into(),
            classification_stale: false,
            quantities: QuantityFields::default(),
            text: SupplementaryText::default(),
        }
    }

    fn classification(code: &str, name: &str) -> Classification {
        Classification {
            tariff_code: code.into(),
            normalized_name: name.into(),
            confidence: Some(0.9),
            reason: "visto en imagen".into(),
            ..Default::default()
        }
    }

    fn session(items: Vec<LineItem>) -> ReviewSession {
        ReviewSession::new("PI-2291", items, 10).with_folder(FolderId::parse("ABC123XYZ01").unwrap())
    }

    fn ticket(start: ReclassifyStart) -> u64 {
        match start {
            ReclassifyStart::Ready { ticket, .. } => ticket,
            ReclassifyStart::Rejected(outcome) => panic!("rejected: {:?}", outcome),
        }
    }

    struct FixedClassifier(AduanaResult<Classification>);

    #[async_trait]
    impl Classifier for FixedClassifier {
        async fn classify(&self, _request: &ClassificationRequest) -> AduanaResult<Classification> {
            self.0.clone()
        }
    }

    struct CountingPublisher {
        calls: AtomicUsize,
        result: AduanaResult<PublishReceipt>,
    }

    impl CountingPublisher {
        fn new(result: AduanaResult<PublishReceipt>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                result,
            })
        }
    }

    #[async_trait]
    impl Publisher for CountingPublisher {
        async fn publish(&self, _request: &PublishRequest) -> AduanaResult<PublishReceipt> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result.clone()
        }
    }

    fn receipt() -> PublishReceipt {
        PublishReceipt {
            sheet_url: "https://sheets.example.com/d/1".into(),
            rows_written: 1,
        }
    }

    #[test]
    fn test_state_transitions() {
        use SessionState::*;
        assert!(Editable.can_transition_to(Publishing));
        assert!(Publishing.can_transition_to(Editable));
        assert!(Publishing.can_transition_to(Published));
        assert!(!Published.can_transition_to(Editable));
        assert!(!Editable.can_transition_to(Published));
        assert!(Published.is_terminal());
    }

    #[test]
    fn test_duplicate_ids_are_rekeyed() {
        let s = session(vec![item("a", "uno", true), item("a", "dos", true), item("b", "tres", true)]);
        let ids: HashSet<_> = s.items().iter().map(|i| i.id.clone()).collect();
        assert_eq!(ids.len(), 3);
        assert_eq!(s.items()[0].id, "a");
        assert_eq!(s.view().warnings.len(), 1);
    }

    #[test]
    fn test_edit_and_delete() {
        let mut s = session(vec![item("a", "parlante", true)]);
        let patch = LineItemPatch {
            tariff_code: Some("8518.22.00".into()),
            ..Default::default()
        };

        let edited = s.apply_edit("a", &patch).unwrap().cloned().unwrap();
        assert_eq!(edited.tariff_code.as_str(), "85182200");

        assert!(s.delete_item("a").unwrap());
        assert!(!s.delete_item("a").unwrap());
        assert!(s.apply_edit("a", &patch).unwrap().is_none());
        assert!(s.items().is_empty());
    }

    #[test]
    fn test_failed_reclassify_leaves_item_unchanged() {
        let mut s = session(vec![item("a", "parlante", true)]);
        let before = s.item("a").cloned().unwrap();

        let t = ticket(s.begin_reclassify("a"));
        let outcome = s.complete_reclassify("a", t, Err(AduanaError::external_service("vlm", "timeout")));
        assert_eq!(outcome.label(), "failed");

        let t = ticket(s.begin_reclassify("a"));
        let outcome = s.complete_reclassify("a", t, Ok(classification("N/A", "Altavoz")));
        assert_eq!(outcome.label(), "failed");

        assert_eq!(s.item("a").unwrap(), &before);
    }

    #[test]
    fn test_reclassify_without_image_fails() {
        let mut s = session(vec![item("a", "parlante", false)]);
        match s.begin_reclassify("a") {
            ReclassifyStart::Rejected(outcome) => assert_eq!(outcome.label(), "failed"),
            ReclassifyStart::Ready { .. } => panic!("item without image must not be classified"),
        }
        match s.begin_reclassify("zzz") {
            ReclassifyStart::Rejected(outcome) => assert_eq!(outcome.label(), "not_found"),
            ReclassifyStart::Ready { .. } => panic!("unknown item must not be classified"),
        }
    }

    #[test]
    fn test_last_issued_ticket_wins() {
        let mut s = session(vec![item("a", "parlante", true)]);
        let first = ticket(s.begin_reclassify("a"));
        let second = ticket(s.begin_reclassify("a"));
        assert!(second > first);

        let newer = s.complete_reclassify("a", second, Ok(classification("8518.22", "Altavoz")));
        let older = s.complete_reclassify("a", first, Ok(classification("8517.62", "Teléfono")));

        assert_eq!(newer.label(), "applied");
        assert_eq!(older.label(), "stale");
        let item = s.item("a").unwrap();
        assert_eq!(item.tariff_code.as_str(), "851822");
        assert_eq!(item.display_name, "Altavoz");
    }

    #[test]
    fn test_name_edit_supersedes_in_flight_classification() {
        let mut s = session(vec![item("a", "parlante", true)]);
        let t = ticket(s.begin_reclassify("a"));

        let patch = LineItemPatch {
            display_name: Some("Audífonos".into()),
            ..Default::default()
        };
        s.apply_edit("a", &patch).unwrap();
        assert!(s.item("a").unwrap().classification_stale);

        let outcome = s.complete_reclassify("a", t, Ok(classification("8518.22", "Altavoz")));
        assert_eq!(outcome.label(), "stale");
        assert_eq!(s.item("a").unwrap().display_name, "Audífonos");

        let t = ticket(s.begin_reclassify("a"));
        let outcome = s.complete_reclassify("a", t, Ok(classification("8518.30", "Auriculares")));
        assert_eq!(outcome.label(), "applied");
        assert!(!s.item("a").unwrap().classification_stale);
    }

    #[test]
    fn test_publishing_blocks_edits_and_defers_results() {
        let mut s = session(vec![item("a", "parlante", true)]);
        let t = ticket(s.begin_reclassify("a"));

        let request = s.begin_publish(PublishTemplate::Maritimo, None, None).unwrap();
        assert_eq!(request.items.len(), 1);
        assert_eq!(s.state(), SessionState::Publishing);

        let err = s.apply_edit("a", &LineItemPatch::default()).unwrap_err();
        assert_eq!(err.error_code(), "SESSION_BUSY");
        assert_eq!(s.delete_item("a").unwrap_err().error_code(), "SESSION_BUSY");
        assert_eq!(
            s.begin_publish(PublishTemplate::Maritimo, None, None).unwrap_err().error_code(),
            "SESSION_BUSY"
        );

        let outcome = s.complete_reclassify("a", t, Ok(classification("8518.22", "Altavoz")));
        assert_eq!(outcome.label(), "deferred");
        assert_eq!(s.item("a").unwrap().tariff_code.as_str(), "8518");

        let replayed = s.finish_publish(false);
        assert_eq!(s.state(), SessionState::Editable);
        assert_eq!(replayed.len(), 1);
        assert_eq!(replayed[0].label(), "applied");
        assert_eq!(s.item("a").unwrap().tariff_code.as_str(), "851822");
    }

    #[test]
    fn test_empty_session_cannot_publish() {
        let mut s = session(vec![]);
        let err = s.begin_publish(PublishTemplate::Aereo, None, None).unwrap_err();
        assert!(matches!(err, AduanaError::EmptySession));
        assert_eq!(s.state(), SessionState::Editable);
    }

    #[test]
    fn test_publish_requires_folder() {
        let mut s = ReviewSession::new("PI", vec![item("a", "x", true)], 10);
        let err = s.begin_publish(PublishTemplate::Aereo, None, None).unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION_ERROR");

        let request = s
            .begin_publish(
                PublishTemplate::Aereo,
                Some("PI final".into()),
                FolderId::parse("https://drive.example.com/drive/folders/XYZ"),
            )
            .unwrap();
        assert_eq!(request.document_name, "PI final");
        assert_eq!(request.folder_id.as_str(), "XYZ");
    }

    #[tokio::test]
    async fn test_handle_reclassify_applies_result() {
        let handle = SessionHandle::new(
            session(vec![item("a", "parlante", true)]),
            Arc::new(FixedClassifier(Ok(classification("8518.22.00", "Altavoz")))),
            CountingPublisher::new(Ok(receipt())),
        );

        match handle.reclassify("a").await {
            ReclassifyOutcome::Applied { item } => {
                assert_eq!(item.tariff_code.as_str(), "85182200");
                assert_eq!(item.display_name, "Altavoz");
                assert_eq!(item.classification_confidence, Some(0.9));
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_handle_reclassify_failure_is_an_outcome() {
        let handle = SessionHandle::new(
            session(vec![item("a", "parlante", true)]),
            Arc::new(FixedClassifier(Err(AduanaError::external_service("vlm", "bad json")))),
            CountingPublisher::new(Ok(receipt())),
        );

        let outcome = handle.reclassify("a").await;
        assert_eq!(outcome.label(), "failed");
        let view = handle.view().await;
        assert_eq!(view.items[0].tariff_code.as_str(), "8518");
        assert_eq!(view.items[0].display_name, "parlante");
    }

    #[tokio::test]
    async fn test_handle_publish_empty_makes_no_call() {
        let publisher = CountingPublisher::new(Ok(receipt()));
        let handle = SessionHandle::new(
            session(vec![]),
            Arc::new(FixedClassifier(Err(AduanaError::internal("unused")))),
            publisher.clone(),
        );

        let err = handle
            .publish(PublishOptions {
                template: PublishTemplate::Aereo,
                document_name: None,
                folder_id: None,
            })
            .await
            .unwrap_err();

        assert_eq!(err.error_code(), "EMPTY_SESSION");
        assert_eq!(publisher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_handle_publish_outcomes() {
        let options = PublishOptions {
            template: PublishTemplate::Maritimo,
            document_name: None,
            folder_id: None,
        };

        let failing = CountingPublisher::new(Err(AduanaError::external_service("commit", "quota")));
        let handle = SessionHandle::new(
            session(vec![item("a", "x", true)]),
            Arc::new(FixedClassifier(Err(AduanaError::internal("unused")))),
            failing.clone(),
        );
        assert!(handle.publish(options.clone()).await.is_err());
        assert_eq!(handle.view().await.state, SessionState::Editable);
        assert_eq!(failing.calls.load(Ordering::SeqCst), 1);

        let handle = SessionHandle::new(
            session(vec![item("a", "x", true)]),
            Arc::new(FixedClassifier(Err(AduanaError::internal("unused")))),
            CountingPublisher::new(Ok(receipt())),
        );
        let published = handle.publish(options).await.unwrap();
        assert_eq!(published.rows_written, 1);
        assert_eq!(handle.view().await.state, SessionState::Published);
    }

    #[tokio::test]
    async fn test_registry() {
        let registry = SessionRegistry::new();
        let handle = SessionHandle::new(
            session(vec![item("a", "x", true)]),
            Arc::new(FixedClassifier(Err(AduanaError::internal("unused")))),
            CountingPublisher::new(Ok(receipt())),
        );

        let id = registry.insert(handle).await;
        assert_eq!(registry.len().await, 1);
        assert_eq!(registry.get(id).await.unwrap().id(), id);
        assert!(registry.remove(id).await.is_some());
        assert_eq!(registry.get(id).await.unwrap_err().error_code(), "NOT_FOUND");
    }
}
