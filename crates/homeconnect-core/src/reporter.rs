// ── Unknown-value reporter ──
//
// Collects drift signatures from the validator, waits for the flow of
// new ones to settle, then writes a single human-readable report with a
// pre-filled issue link. The report describes the unrecognised keys in
// the shape of type declarations so a maintainer can paste them into
// the catalogue.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt::Write as _;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use url::Url;

use crate::catalogue::{Group, ValueKind};
use crate::model::Appliance;
use crate::registry::{InferredType, KeyRecord, KeyRegistry};

/// Longest issue link handed out. Issue trackers reject longer ones.
pub const MAX_ISSUE_URL_LEN: usize = 8_000;

const TRUNCATED_NOTE: &str =
    "\n_Truncated. The full report is in the client log under \"drift report\"._\n";

/// Identity of one flagged occurrence, used for debouncing and
/// suppression.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Signature {
    pub group: Group,
    pub key: String,
    /// The unrecognised literal, for unknown-literal drift.
    pub literal: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ReporterConfig {
    /// Quiet period after the last new signature before a report fires.
    pub debounce: Duration,
    /// How long a reported signature stays silent.
    pub suppress_for: Duration,
    /// Issue tracker "new issue" page the report link points at.
    pub issue_url: Url,
    /// Maximum number of times a report is postponed while some key
    /// still has no known type.
    pub max_deferrals: u32,
}

impl ReporterConfig {
    /// Defaults, linking to this project's issue tracker.
    pub fn new() -> Result<Self, url::ParseError> {
        Ok(Self {
            debounce: Duration::from_secs(2 * 60),
            suppress_for: Duration::from_secs(24 * 60 * 60),
            issue_url: Url::parse(concat!(env!("CARGO_PKG_REPOSITORY"), "/issues/new"))?,
            max_deferrals: 5,
        })
    }
}

/// A finished drift report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriftReport {
    pub title: String,
    pub body: String,
    /// Pre-filled issue link carrying `title` and as much of `body` as
    /// fits in [`MAX_ISSUE_URL_LEN`].
    pub issue_url: Url,
    pub signatures: Vec<Signature>,
}

#[derive(Default)]
struct ReporterState {
    pending: BTreeSet<Signature>,
    suppressed: HashMap<Signature, Instant>,
    appliances: BTreeMap<String, Appliance>,
    timer: Option<JoinHandle<()>>,
    deferrals: u32,
}

struct ReporterInner {
    config: ReporterConfig,
    registry: Arc<KeyRegistry>,
    state: Mutex<ReporterState>,
    reports: watch::Sender<Option<Arc<DriftReport>>>,
}

/// Cheaply cloneable handle; clones share the pending set and timer.
#[derive(Clone)]
pub struct Reporter {
    inner: Arc<ReporterInner>,
}

impl Reporter {
    pub fn new(registry: Arc<KeyRegistry>, config: ReporterConfig) -> Self {
        let (reports, _) = watch::channel(None);
        Self {
            inner: Arc::new(ReporterInner {
                config,
                registry,
                state: Mutex::new(ReporterState::default()),
                reports,
            }),
        }
    }

    /// Record a drift signature. New signatures restart the debounce
    /// timer; pending or recently reported ones are ignored.
    pub fn flag(&self, signature: Signature) {
        let mut state = self.inner.lock();
        let now = Instant::now();
        state.suppressed.retain(|_, until| *until > now);
        if state.suppressed.contains_key(&signature) || !state.pending.insert(signature) {
            return;
        }
        ReporterInner::arm(&self.inner, &mut state);
    }

    /// Remember an appliance so reports can list what is affected.
    pub fn add_appliance(&self, appliance: &Appliance) {
        self.inner
            .lock()
            .appliances
            .insert(appliance.ha_id.clone(), appliance.clone());
    }

    /// Subscribe to finished reports.
    pub fn reports(&self) -> watch::Receiver<Option<Arc<DriftReport>>> {
        self.inner.reports.subscribe()
    }

    pub fn last_report(&self) -> Option<Arc<DriftReport>> {
        self.inner.reports.borrow().clone()
    }

    pub fn pending(&self) -> Vec<Signature> {
        self.inner.lock().pending.iter().cloned().collect()
    }

    /// Build a report from whatever is pending right now, without
    /// waiting for the debounce or for unknown types to resolve.
    pub fn flush(&self) -> Option<Arc<DriftReport>> {
        self.inner.fire(true)
    }
}

impl ReporterInner {
    fn lock(&self) -> std::sync::MutexGuard<'_, ReporterState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// (Re)start the debounce timer. Without a runtime the signatures
    /// simply wait for [`Reporter::flush`].
    fn arm(this: &Arc<Self>, state: &mut ReporterState) {
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            debug!("no runtime; drift report waits for an explicit flush");
            return;
        };
        let weak: Weak<Self> = Arc::downgrade(this);
        let debounce = this.config.debounce;
        state.timer = Some(handle.spawn(async move {
            tokio::time::sleep(debounce).await;
            if let Some(inner) = weak.upgrade() {
                inner.fire(false);
            }
        }));
    }

    fn fire(self: &Arc<Self>, force: bool) -> Option<Arc<DriftReport>> {
        let mut state = self.lock();
        if force {
            if let Some(timer) = state.timer.take() {
                timer.abort();
            }
        } else {
            state.timer = None;
        }
        if state.pending.is_empty() {
            return None;
        }

        if !force && state.deferrals < self.config.max_deferrals {
            let untyped: Vec<&str> = state
                .pending
                .iter()
                .filter(|s| carries_values(s.group) && !self.registry.type_known(&s.key))
                .map(|s| s.key.as_str())
                .collect();
            if !untyped.is_empty() {
                debug!(keys = ?untyped, "postponing drift report until value types are known");
                state.deferrals += 1;
                Self::arm(self, &mut state);
                return None;
            }
        }

        let signatures: Vec<Signature> = std::mem::take(&mut state.pending).into_iter().collect();
        state.deferrals = 0;
        let until = Instant::now() + self.config.suppress_for;
        for signature in &signatures {
            state.suppressed.insert(signature.clone(), until);
        }
        let appliances: Vec<Appliance> = state.appliances.values().cloned().collect();
        drop(state);

        let report = Arc::new(build_report(
            &self.config.issue_url,
            &signatures,
            &self.registry.snapshot(),
            &appliances,
        ));
        warn!(
            keys = signatures.len(),
            issue = %report.issue_url,
            "{}; please report it",
            report.title
        );
        info!(body = %report.body, "drift report");
        self.reports.send_replace(Some(Arc::clone(&report)));
        Some(report)
    }
}

/// Groups whose keys carry values (and so have a type to wait for).
fn carries_values(group: Group) -> bool {
    matches!(
        group,
        Group::Status | Group::Setting | Group::Option | Group::Event
    )
}

// ── Report rendering ─────────────────────────────────────────────────

fn type_name(kind: &InferredType) -> String {
    match kind {
        InferredType::Unknown => "unknown".into(),
        InferredType::Boolean => "boolean".into(),
        InferredType::Number => "number".into(),
        InferredType::String => "string".into(),
        InferredType::Enum(name) => name.clone(),
    }
}

/// All literals known for an enumeration field: declared plus observed.
fn field_literals(record: &KeyRecord) -> BTreeSet<String> {
    let mut literals: BTreeSet<String> = record.literals.keys().cloned().collect();
    if let Some(ValueKind::Enum(spec)) = record.declared {
        literals.extend(spec.literals());
    }
    literals
}

fn new_marker(is_new: bool) -> &'static str {
    if is_new { "  // new" } else { "" }
}

pub(crate) fn build_report(
    issue_base: &Url,
    signatures: &[Signature],
    records: &[KeyRecord],
    appliances: &[Appliance],
) -> DriftReport {
    let trigger_keys: BTreeSet<(Group, &str)> =
        signatures.iter().map(|s| (s.group, s.key.as_str())).collect();
    let trigger_literals: BTreeSet<&str> = signatures
        .iter()
        .filter_map(|s| s.literal.as_deref())
        .collect();
    let groups: BTreeSet<Group> = signatures.iter().map(|s| s.group).collect();

    // Enumerations referenced by the listed fields, merged by name.
    let mut enums: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    let mut listings: BTreeMap<Group, Vec<String>> = BTreeMap::new();
    for record in records {
        for group in record.groups.iter().filter(|g| groups.contains(g)) {
            let is_new = trigger_keys.contains(&(*group, record.key.as_str()));
            let value_type = record.value_type();
            if let InferredType::Enum(name) = &value_type {
                enums
                    .entry(name.clone())
                    .or_default()
                    .extend(field_literals(record));
            }
            let line = if carries_values(*group) {
                format!("    '{}': {}{}", record.key, type_name(&value_type), new_marker(is_new))
            } else {
                format!("    | '{}'{}", record.key, new_marker(is_new))
            };
            listings.entry(*group).or_default().push(line);
        }
    }

    let title = format!(
        "Unrecognised Home Connect API keys or values ({})",
        signatures.len()
    );

    let mut body = String::new();
    let _ = writeln!(
        body,
        "The Home Connect API returned keys or values that are not in the catalogue.\n"
    );
    if !appliances.is_empty() {
        let _ = writeln!(body, "### Appliances\n");
        for appliance in appliances {
            let _ = writeln!(
                body,
                "- {} {} (E-Nr {})",
                appliance.brand, appliance.kind, appliance.enumber
            );
        }
        let _ = writeln!(body);
    }

    let _ = writeln!(body, "### Types\n\n```");
    for (name, literals) in &enums {
        let _ = writeln!(body, "enum {name} {{");
        for literal in literals {
            let member = literal.rsplit('.').next().unwrap_or(literal);
            let _ = writeln!(
                body,
                "    {member} = '{literal}',{}",
                new_marker(trigger_literals.contains(literal.as_str()))
            );
        }
        let _ = writeln!(body, "}}\n");
    }
    for (group, lines) in &listings {
        if carries_values(*group) {
            let _ = writeln!(body, "interface {group}Values {{");
            for line in lines {
                let _ = writeln!(body, "{line}");
            }
            let _ = writeln!(body, "}}\n");
        } else {
            let _ = writeln!(body, "type {group}Key =");
            for line in lines {
                let _ = writeln!(body, "{line}");
            }
            let _ = writeln!(body);
        }
    }
    let _ = writeln!(body, "```");

    let issue_url = issue_link(issue_base, &title, &body);

    DriftReport {
        title,
        body,
        issue_url,
        signatures: signatures.to_vec(),
    }
}

/// Issue link for a report, dropping trailing body lines until it fits.
fn issue_link(base: &Url, title: &str, body: &str) -> Url {
    let link = |body: &str| {
        let mut url = base.clone();
        url.query_pairs_mut()
            .append_pair("title", title)
            .append_pair("body", body);
        url
    };
    let full = link(body);
    if full.as_str().len() <= MAX_ISSUE_URL_LEN {
        return full;
    }

    let lines: Vec<&str> = body.lines().collect();
    let shortened = |keep: usize| {
        let mut text = lines[..keep].join("\n");
        // Close a code block the cut left open.
        if lines[..keep].iter().filter(|l| l.starts_with("```")).count() % 2 == 1 {
            text.push_str("\n```");
        }
        text.push_str(TRUNCATED_NOTE);
        link(&text)
    };

    // Largest prefix that still fits; lengths grow with the prefix.
    let (mut low, mut high) = (0, lines.len());
    while low < high {
        let mid = (low + high).div_ceil(2);
        if shortened(mid).as_str().len() <= MAX_ISSUE_URL_LEN {
            low = mid;
        } else {
            high = mid - 1;
        }
    }
    debug!(kept = low, total = lines.len(), "issue link body truncated");
    shortened(low)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::registry::Observation;

    const DEBOUNCE: Duration = Duration::from_secs(120);

    fn observe(registry: &KeyRegistry, group: Group, key: &str, value: Option<serde_json::Value>) {
        registry.observe(Observation {
            group,
            key,
            value: value.as_ref(),
            spec: None,
            literal_recognised: false,
        });
    }

    fn signature(group: Group, key: &str) -> Signature {
        Signature {
            group,
            key: key.into(),
            literal: None,
        }
    }

    fn reporter(registry: &Arc<KeyRegistry>) -> Reporter {
        Reporter::new(Arc::clone(registry), ReporterConfig::new().unwrap())
    }

    #[tokio::test(start_paused = true)]
    async fn merges_enums_by_synthesised_name() {
        let registry = Arc::new(KeyRegistry::new());
        observe(&registry, Group::Status, "Foo.Bar.Status.One", Some(json!("Foo.Bar.EnumType.X.A")));
        observe(&registry, Group::Status, "Foo.Bar.Status.Two", Some(json!("Foo.Bar.EnumType.X.B")));

        let reporter = reporter(&registry);
        let mut reports = reporter.reports();
        reporter.flag(signature(Group::Status, "Foo.Bar.Status.One"));
        reporter.flag(signature(Group::Status, "Foo.Bar.Status.Two"));

        reports.changed().await.unwrap();
        let report = reports.borrow().clone().unwrap();

        assert_eq!(report.body.matches("enum X {").count(), 1);
        assert!(report.body.contains("A = 'Foo.Bar.EnumType.X.A',"));
        assert!(report.body.contains("B = 'Foo.Bar.EnumType.X.B',"));
        assert!(report.body.contains("'Foo.Bar.Status.One': X  // new"));
        assert!(report.body.contains("'Foo.Bar.Status.Two': X  // new"));
        assert_eq!(report.signatures.len(), 2);
        assert!(reporter.pending().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn new_signature_restarts_debounce() {
        let registry = Arc::new(KeyRegistry::new());
        observe(&registry, Group::Status, "Foo.Status.A", Some(json!(1)));
        observe(&registry, Group::Status, "Foo.Status.B", Some(json!(2)));
        let reporter = reporter(&registry);
        let reports = reporter.reports();

        reporter.flag(signature(Group::Status, "Foo.Status.A"));
        tokio::time::sleep(DEBOUNCE - Duration::from_secs(10)).await;
        reporter.flag(signature(Group::Status, "Foo.Status.B"));
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert!(reports.borrow().is_none());

        tokio::time::sleep(DEBOUNCE).await;
        let report = reporter.last_report().unwrap();
        assert_eq!(report.signatures.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn defers_while_a_type_is_unknown() {
        let registry = Arc::new(KeyRegistry::new());
        observe(&registry, Group::Option, "Foo.Option.Mystery", None);
        let reporter = reporter(&registry);

        reporter.flag(signature(Group::Option, "Foo.Option.Mystery"));
        tokio::time::sleep(DEBOUNCE + Duration::from_secs(1)).await;
        assert!(reporter.last_report().is_none());
        assert_eq!(reporter.pending().len(), 1);

        registry.declare(Group::Option, "Foo.Option.Mystery", InferredType::Number);
        tokio::time::sleep(DEBOUNCE + Duration::from_secs(1)).await;
        let report = reporter.last_report().unwrap();
        assert!(report.body.contains("'Foo.Option.Mystery': number  // new"));
    }

    #[tokio::test(start_paused = true)]
    async fn reported_signatures_are_suppressed() {
        let registry = Arc::new(KeyRegistry::new());
        observe(&registry, Group::Status, "Foo.Status.A", Some(json!(true)));
        let reporter = reporter(&registry);

        reporter.flag(signature(Group::Status, "Foo.Status.A"));
        assert!(reporter.flush().is_some());

        reporter.flag(signature(Group::Status, "Foo.Status.A"));
        assert!(reporter.pending().is_empty());

        tokio::time::advance(Duration::from_secs(24 * 60 * 60 + 1)).await;
        reporter.flag(signature(Group::Status, "Foo.Status.A"));
        assert_eq!(reporter.pending().len(), 1);
    }

    #[test]
    fn report_lists_appliances_and_links_issue() {
        let registry = KeyRegistry::new();
        observe(&registry, Group::Program, "Foo.Program.New", None);
        let appliance: Appliance = serde_json::from_value(json!({
            "haId": "SIEMENS-X", "type": "Oven", "brand": "Siemens", "enumber": "HB678GBS6/01"
        }))
        .unwrap();

        let base = Url::parse("https://example.test/issues/new").unwrap();
        let report = build_report(
            &base,
            &[signature(Group::Program, "Foo.Program.New")],
            &registry.snapshot(),
            &[appliance],
        );

        assert!(report.body.contains("- Siemens Oven (E-Nr HB678GBS6/01)"));
        assert!(report.body.contains("    | 'Foo.Program.New'  // new"));
        let query: HashMap<_, _> = report.issue_url.query_pairs().into_owned().collect();
        assert_eq!(query.get("title"), Some(&report.title));
        assert_eq!(query.get("body"), Some(&report.body));
    }

    #[test]
    fn long_reports_are_cut_to_fit_the_issue_link() {
        let registry = KeyRegistry::new();
        let signatures: Vec<Signature> = (0..400)
            .map(|i| {
                let key = format!("Foo.Bar.Status.Unrecognised{i:03}");
                observe(&registry, Group::Status, &key, Some(json!(i)));
                signature(Group::Status, &key)
            })
            .collect();

        let base = Url::parse("https://example.test/issues/new").unwrap();
        let report = build_report(&base, &signatures, &registry.snapshot(), &[]);

        assert!(report.issue_url.as_str().len() <= MAX_ISSUE_URL_LEN);
        assert!(report.body.contains("Unrecognised399"));

        let query: HashMap<_, _> = report.issue_url.query_pairs().into_owned().collect();
        let linked = &query["body"];
        assert!(report.body.starts_with(linked.lines().next().unwrap()));
        assert!(linked.contains("Unrecognised000"));
        assert!(!linked.contains("Unrecognised399"));
        assert!(linked.ends_with(TRUNCATED_NOTE));
        assert_eq!(linked.matches("```").count() % 2, 0);
    }
}
