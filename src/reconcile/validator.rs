use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::domain::{AppId, Platform};
use crate::models::free_game::FreeGame;
use crate::models::steam::SteamApp;
use crate::models::video::Video;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
}

/// Every distinct way the reconciled state can be wrong. Error-severity
/// codes block persistence; warnings are logged and let the commit
/// through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FindingCode {
    // Pair pointers.
    BrokenDemoBidirectionality,
    DanglingPairReference,

    // Field consistency on a single entity.
    DemoFullFlagsConflict,
    MissingDemoId,
    UnexpectedDemoId,
    MissingFullGameId,
    UnexpectedFullGameId,
    MalformedDemoId,
    MalformedFullGameId,
    SelfReferentialDemo,
    SelfReferentialFullGame,

    // Cross-platform link symmetry.
    AsymmetricFreeLink,
    AsymmetricSteamLink,
    MalformedSteamUrl,

    // Stub resolution chains.
    DanglingResolutionTarget,
    CircularResolutionChain,

    // Video references.
    VideoReferencesMissingSteamGame,
    VideoReferencesMissingFreeGame,

    // Tolerable oddities.
    StubMissingReason,
    ReviewPercentOutOfRange,
}

impl FindingCode {
    #[must_use]
    pub const fn severity(self) -> Severity {
        match self {
            // A video can legitimately reference a game the capped or
            // partially-failed cycle has not fetched yet; blocking the
            // commit on that would wedge incremental backfills.
            Self::VideoReferencesMissingSteamGame
            | Self::VideoReferencesMissingFreeGame
            | Self::StubMissingReason
            | Self::ReviewPercentOutOfRange => Severity::Warning,
            _ => Severity::Error,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::BrokenDemoBidirectionality => "broken_demo_bidirectionality",
            Self::DanglingPairReference => "dangling_pair_reference",
            Self::DemoFullFlagsConflict => "demo_full_flags_conflict",
            Self::MissingDemoId => "missing_demo_id",
            Self::UnexpectedDemoId => "unexpected_demo_id",
            Self::MissingFullGameId => "missing_full_game_id",
            Self::UnexpectedFullGameId => "unexpected_full_game_id",
            Self::MalformedDemoId => "malformed_demo_id",
            Self::MalformedFullGameId => "malformed_full_game_id",
            Self::SelfReferentialDemo => "self_referential_demo",
            Self::SelfReferentialFullGame => "self_referential_full_game",
            Self::AsymmetricFreeLink => "asymmetric_free_link",
            Self::AsymmetricSteamLink => "asymmetric_steam_link",
            Self::MalformedSteamUrl => "malformed_steam_url",
            Self::DanglingResolutionTarget => "dangling_resolution_target",
            Self::CircularResolutionChain => "circular_resolution_chain",
            Self::VideoReferencesMissingSteamGame => "video_references_missing_steam_game",
            Self::VideoReferencesMissingFreeGame => "video_references_missing_free_game",
            Self::StubMissingReason => "stub_missing_reason",
            Self::ReviewPercentOutOfRange => "review_percent_out_of_range",
        }
    }
}

impl fmt::Display for FindingCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finding {
    pub code: FindingCode,
    pub severity: Severity,
    /// Id of the entity the finding is attached to: app id, listing
    /// URL or video id.
    pub entity: String,
    pub message: String,
}

impl Finding {
    fn new(code: FindingCode, entity: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code,
            severity: code.severity(),
            entity: entity.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.code, self.entity, self.message)
    }
}

/// A consistent view of both stores plus every known video.
///
/// Borrowed so the validator can run against loaded state or against a
/// pending in-memory snapshot without touching disk mid-validation.
pub struct Snapshot<'a> {
    pub apps: &'a HashMap<String, SteamApp>,
    pub free: &'a HashMap<String, FreeGame>,
    pub videos: Vec<&'a Video>,
}

/// Runs the fixed battery of integrity checks that gates every write.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReferenceValidator;

impl ReferenceValidator {
    #[must_use]
    pub fn validate(&self, snapshot: &Snapshot<'_>) -> Vec<Finding> {
        let mut findings = Vec::new();
        self.check_field_consistency(snapshot, &mut findings);
        self.check_pair_pointers(snapshot, &mut findings);
        self.check_link_symmetry(snapshot, &mut findings);
        self.check_resolution_chains(snapshot, &mut findings);
        self.check_video_references(snapshot, &mut findings);
        findings
    }

    #[must_use]
    pub fn has_errors(findings: &[Finding]) -> bool {
        findings.iter().any(|f| f.severity == Severity::Error)
    }

    fn check_field_consistency(&self, snapshot: &Snapshot<'_>, findings: &mut Vec<Finding>) {
        for (id, app) in snapshot.apps {
            if app.is_demo && app.has_demo {
                findings.push(Finding::new(
                    FindingCode::DemoFullFlagsConflict,
                    id,
                    "is_demo and has_demo are mutually exclusive",
                ));
            }
            if app.has_demo && app.demo_id.is_none() {
                findings.push(Finding::new(
                    FindingCode::MissingDemoId,
                    id,
                    "has_demo set without demo_id",
                ));
            }
            if app.demo_id.is_some() && !app.has_demo {
                findings.push(Finding::new(
                    FindingCode::UnexpectedDemoId,
                    id,
                    "demo_id set without has_demo",
                ));
            }
            if app.is_demo && app.full_game_id.is_none() {
                findings.push(Finding::new(
                    FindingCode::MissingFullGameId,
                    id,
                    "is_demo set without full_game_id",
                ));
            }
            if app.full_game_id.is_some() && !app.is_demo {
                findings.push(Finding::new(
                    FindingCode::UnexpectedFullGameId,
                    id,
                    "full_game_id set without is_demo",
                ));
            }
            if let Some(demo_id) = &app.demo_id {
                if !AppId::new(demo_id.clone()).is_numeric() {
                    findings.push(Finding::new(
                        FindingCode::MalformedDemoId,
                        id,
                        format!("demo_id {demo_id:?} is not numeric"),
                    ));
                }
                if demo_id == id {
                    findings.push(Finding::new(
                        FindingCode::SelfReferentialDemo,
                        id,
                        "demo_id points at the entity itself",
                    ));
                }
            }
            if let Some(full_id) = &app.full_game_id {
                if !AppId::new(full_id.clone()).is_numeric() {
                    findings.push(Finding::new(
                        FindingCode::MalformedFullGameId,
                        id,
                        format!("full_game_id {full_id:?} is not numeric"),
                    ));
                }
                // A demo pointing at itself is the standalone-demo
                // exception; anything else self-referential is broken.
                if full_id == id && !app.is_demo {
                    findings.push(Finding::new(
                        FindingCode::SelfReferentialFullGame,
                        id,
                        "full_game_id points at the entity itself",
                    ));
                }
            }

            if app.is_stub && app.stub_reason.is_none() {
                findings.push(Finding::new(
                    FindingCode::StubMissingReason,
                    id,
                    "stub without a recorded reason",
                ));
            }
            if let Some(percent) = app.reviews.percent_positive
                && percent > 100
            {
                findings.push(Finding::new(
                    FindingCode::ReviewPercentOutOfRange,
                    id,
                    format!("review percentage {percent} exceeds 100"),
                ));
            }
        }

        for (url, game) in snapshot.free {
            if game.is_stub && game.stub_reason.is_none() {
                findings.push(Finding::new(
                    FindingCode::StubMissingReason,
                    url,
                    "stub without a recorded reason",
                ));
            }
            if let Some(percent) = game.reviews.percent_positive
                && percent > 100
            {
                findings.push(Finding::new(
                    FindingCode::ReviewPercentOutOfRange,
                    url,
                    format!("review percentage {percent} exceeds 100"),
                ));
            }
        }
    }

    /// Each side of a demo/full pair must resolve and point back.
    /// An unresolvable pointer is a distinct finding from a resolved
    /// pointer whose target disagrees.
    fn check_pair_pointers(&self, snapshot: &Snapshot<'_>, findings: &mut Vec<Finding>) {
        for (id, app) in snapshot.apps {
            if app.has_demo
                && let Some(demo_id) = &app.demo_id
                && demo_id != id
            {
                match snapshot.apps.get(demo_id) {
                    None => findings.push(Finding::new(
                        FindingCode::DanglingPairReference,
                        id,
                        format!("demo {demo_id} is not in the store"),
                    )),
                    Some(demo) => {
                        if !demo.is_demo || demo.full_game_id.as_deref() != Some(id) {
                            findings.push(Finding::new(
                                FindingCode::BrokenDemoBidirectionality,
                                id,
                                format!("demo {demo_id} does not point back at {id}"),
                            ));
                        }
                    }
                }
            }

            if app.is_demo
                && let Some(full_id) = &app.full_game_id
                && full_id != id
            {
                match snapshot.apps.get(full_id) {
                    None => findings.push(Finding::new(
                        FindingCode::DanglingPairReference,
                        id,
                        format!("full game {full_id} is not in the store"),
                    )),
                    Some(full) => {
                        if !full.has_demo || full.demo_id.as_deref() != Some(id) {
                            findings.push(Finding::new(
                                FindingCode::BrokenDemoBidirectionality,
                                id,
                                format!("full game {full_id} does not point back at {id}"),
                            ));
                        }
                    }
                }
            }
        }
    }

    fn check_link_symmetry(&self, snapshot: &Snapshot<'_>, findings: &mut Vec<Finding>) {
        for (id, app) in snapshot.apps {
            for (platform, url) in &app.free_links {
                match snapshot.free.get(url) {
                    None => findings.push(Finding::new(
                        FindingCode::AsymmetricFreeLink,
                        id,
                        format!("{platform} link {url} is not in the store"),
                    )),
                    Some(game) => {
                        let points_back = game.platform == *platform
                            && game.steam_app_id().as_deref() == Some(id.as_str());
                        if !points_back {
                            findings.push(Finding::new(
                                FindingCode::AsymmetricFreeLink,
                                id,
                                format!("{platform} link {url} does not point back at {id}"),
                            ));
                        }
                    }
                }
            }
        }

        for (url, game) in snapshot.free {
            let Some(steam_url) = &game.steam_url else {
                continue;
            };
            let Some(app_id) = game.steam_app_id() else {
                findings.push(Finding::new(
                    FindingCode::MalformedSteamUrl,
                    url,
                    format!("steam_url {steam_url:?} is not a store app URL"),
                ));
                continue;
            };
            let points_back = snapshot
                .apps
                .get(&app_id)
                .is_some_and(|app| app.free_links.get(&game.platform) == Some(url));
            if !points_back {
                findings.push(Finding::new(
                    FindingCode::AsymmetricSteamLink,
                    url,
                    format!("steam_url points at {app_id} which does not link back"),
                ));
            }
        }
    }

    fn check_resolution_chains(&self, snapshot: &Snapshot<'_>, findings: &mut Vec<Finding>) {
        let app_next =
            |id: &str| -> Option<Option<String>> { snapshot.apps.get(id).map(|a| a.resolved_to.clone()) };
        for (id, app) in snapshot.apps {
            if app.is_stub {
                walk_chain(id, app.resolved_to.as_deref(), &app_next, findings);
            }
        }

        let free_next =
            |id: &str| -> Option<Option<String>> { snapshot.free.get(id).map(|g| g.resolved_to.clone()) };
        for (url, game) in snapshot.free {
            if game.is_stub {
                walk_chain(url, game.resolved_to.as_deref(), &free_next, findings);
            }
        }
    }

    fn check_video_references(&self, snapshot: &Snapshot<'_>, findings: &mut Vec<Finding>) {
        for video in &snapshot.videos {
            for game_ref in video.effective_refs() {
                match game_ref.platform {
                    Platform::Steam => {
                        if !snapshot.apps.contains_key(&game_ref.id) {
                            findings.push(Finding::new(
                                FindingCode::VideoReferencesMissingSteamGame,
                                &video.id,
                                format!("references catalog id {} which does not exist", game_ref.id),
                            ));
                        }
                    }
                    Platform::Itch | Platform::GameJolt => {
                        if !snapshot.free.contains_key(&game_ref.id) {
                            findings.push(Finding::new(
                                FindingCode::VideoReferencesMissingFreeGame,
                                &video.id,
                                format!("references listing {} which does not exist", game_ref.id),
                            ));
                        }
                    }
                }
            }
        }
    }
}

/// Follow a resolution chain with a visited set, flagging immediately
/// on a revisit or a link into nowhere. The origin id is already part
/// of the chain, so a chain pointing straight back at it is a cycle of
/// length one.
fn walk_chain<F>(origin: &str, first: Option<&str>, next: &F, findings: &mut Vec<Finding>)
where
    F: Fn(&str) -> Option<Option<String>>,
{
    let mut visited: HashSet<String> = HashSet::from([origin.to_string()]);
    let mut current = first.map(str::to_string);

    while let Some(target) = current {
        if visited.contains(&target) {
            findings.push(Finding::new(
                FindingCode::CircularResolutionChain,
                origin,
                format!("resolution chain revisits {target}"),
            ));
            return;
        }
        let Some(onward) = next(&target) else {
            findings.push(Finding::new(
                FindingCode::DanglingResolutionTarget,
                origin,
                format!("resolution target {target} does not exist"),
            ));
            return;
        };
        visited.insert(target);
        current = onward;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::steam::ReviewStats;
    use crate::models::video::{GameRef, Video};
    use chrono::Utc;

    fn validate(apps: &HashMap<String, SteamApp>, free: &HashMap<String, FreeGame>) -> Vec<Finding> {
        ReferenceValidator.validate(&Snapshot {
            apps,
            free,
            videos: Vec::new(),
        })
    }

    fn errors(findings: &[Finding]) -> Vec<FindingCode> {
        findings
            .iter()
            .filter(|f| f.severity == Severity::Error)
            .map(|f| f.code)
            .collect()
    }

    fn pair() -> HashMap<String, SteamApp> {
        let mut full = SteamApp::new("100", "Hollow Depths");
        full.has_demo = true;
        full.demo_id = Some("200".to_string());
        let mut demo = SteamApp::new("200", "Hollow Depths Demo");
        demo.is_demo = true;
        demo.full_game_id = Some("100".to_string());
        HashMap::from([("100".to_string(), full), ("200".to_string(), demo)])
    }

    #[test]
    fn intact_pair_passes() {
        let findings = validate(&pair(), &HashMap::new());
        assert!(errors(&findings).is_empty(), "unexpected: {findings:?}");
    }

    #[test]
    fn mismatched_backpointer_is_exactly_one_bidirectionality_error() {
        let mut apps = pair();
        apps.get_mut("200").unwrap().full_game_id = Some("999".to_string());

        let findings = validate(&apps, &HashMap::new());
        let bidi: Vec<_> = findings
            .iter()
            .filter(|f| f.code == FindingCode::BrokenDemoBidirectionality)
            .collect();
        assert_eq!(bidi.len(), 1);
        assert_eq!(bidi[0].entity, "100");

        // The demo's own pointer into nowhere is a separate code.
        assert!(
            findings
                .iter()
                .any(|f| f.code == FindingCode::DanglingPairReference && f.entity == "200")
        );
    }

    #[test]
    fn field_consistency_rules_each_fire_distinctly() {
        let mut apps = HashMap::new();

        let mut both = SteamApp::new("1", "Both");
        both.is_demo = true;
        both.has_demo = true;
        both.demo_id = Some("2".to_string());
        both.full_game_id = Some("3".to_string());
        apps.insert("1".to_string(), both);

        let mut missing_demo = SteamApp::new("4", "No demo id");
        missing_demo.has_demo = true;
        apps.insert("4".to_string(), missing_demo);

        let mut unexpected = SteamApp::new("5", "Orphan demo id");
        unexpected.demo_id = Some("6".to_string());
        apps.insert("5".to_string(), unexpected);

        let mut missing_full = SteamApp::new("7", "No full id");
        missing_full.is_demo = true;
        apps.insert("7".to_string(), missing_full);

        let mut malformed = SteamApp::new("8", "Bad ids");
        malformed.has_demo = true;
        malformed.demo_id = Some("not-a-number".to_string());
        apps.insert("8".to_string(), malformed);

        let mut selfish = SteamApp::new("9", "Own demo");
        selfish.has_demo = true;
        selfish.demo_id = Some("9".to_string());
        apps.insert("9".to_string(), selfish);

        let codes = errors(&validate(&apps, &HashMap::new()));
        for expected in [
            FindingCode::DemoFullFlagsConflict,
            FindingCode::MissingDemoId,
            FindingCode::UnexpectedDemoId,
            FindingCode::MissingFullGameId,
            FindingCode::MalformedDemoId,
            FindingCode::SelfReferentialDemo,
        ] {
            assert!(codes.contains(&expected), "missing {expected}");
        }
    }

    #[test]
    fn standalone_demo_exception_is_allowed() {
        let mut apps = HashMap::new();
        let mut standalone = SteamApp::new("10", "Forever Demo");
        standalone.is_demo = true;
        standalone.full_game_id = Some("10".to_string());
        apps.insert("10".to_string(), standalone);

        let codes = errors(&validate(&apps, &HashMap::new()));
        assert!(!codes.contains(&FindingCode::SelfReferentialFullGame));
    }

    #[test]
    fn circular_resolution_reported_for_both_stubs() {
        let mut apps = HashMap::new();
        let a = SteamApp::new("1", "A").into_stub("moved", Some("2".to_string()), Utc::now());
        let b = SteamApp::new("2", "B").into_stub("moved", Some("1".to_string()), Utc::now());
        apps.insert("1".to_string(), a);
        apps.insert("2".to_string(), b);

        let findings = validate(&apps, &HashMap::new());
        let cycles: Vec<_> = findings
            .iter()
            .filter(|f| f.code == FindingCode::CircularResolutionChain)
            .map(|f| f.entity.clone())
            .collect();
        assert_eq!(cycles.len(), 2);
        assert!(cycles.contains(&"1".to_string()));
        assert!(cycles.contains(&"2".to_string()));
    }

    #[test]
    fn acyclic_chains_up_to_five_are_clean() {
        for len in 0..=5u32 {
            let mut apps = HashMap::new();
            for i in 0..=len {
                let next = (i < len).then(|| (i + 1).to_string());
                let app = if i == 0 && len > 0 {
                    SteamApp::new("0", "origin").into_stub("moved", next, Utc::now())
                } else {
                    let mut plain = SteamApp::new(i.to_string(), format!("node {i}"));
                    plain.resolved_to = next;
                    if i == 0 {
                        plain = plain.into_stub("dead end", None, Utc::now());
                    }
                    plain
                };
                apps.insert(i.to_string(), app);
            }

            let findings = validate(&apps, &HashMap::new());
            assert!(
                !findings
                    .iter()
                    .any(|f| f.code == FindingCode::CircularResolutionChain),
                "false cycle at chain length {len}"
            );
        }
    }

    #[test]
    fn self_loop_is_a_cycle_of_length_one() {
        let mut apps = HashMap::new();
        apps.insert(
            "1".to_string(),
            SteamApp::new("1", "A").into_stub("moved", Some("1".to_string()), Utc::now()),
        );

        let codes = errors(&validate(&apps, &HashMap::new()));
        assert!(codes.contains(&FindingCode::CircularResolutionChain));
    }

    #[test]
    fn dangling_resolution_target() {
        let mut apps = HashMap::new();
        apps.insert(
            "1".to_string(),
            SteamApp::new("1", "A").into_stub("moved", Some("404".to_string()), Utc::now()),
        );

        let codes = errors(&validate(&apps, &HashMap::new()));
        assert!(codes.contains(&FindingCode::DanglingResolutionTarget));
    }

    #[test]
    fn link_symmetry_must_hold_exactly() {
        use crate::models::free_game::steam_app_url;

        let mut apps = HashMap::new();
        apps.insert(
            "100".to_string(),
            SteamApp::new("100", "Game").with_free_link(Platform::Itch, "https://a.itch.io/g"),
        );
        // Listing exists but does not point back.
        let mut free = HashMap::new();
        free.insert(
            "https://a.itch.io/g".to_string(),
            FreeGame::new("https://a.itch.io/g", Platform::Itch, "Game"),
        );

        let codes = errors(&validate(&apps, &free));
        assert!(codes.contains(&FindingCode::AsymmetricFreeLink));

        // Fixing the back-link clears it.
        free.insert(
            "https://a.itch.io/g".to_string(),
            FreeGame::new("https://a.itch.io/g", Platform::Itch, "Game")
                .with_steam_url(steam_app_url("100")),
        );
        let codes = errors(&validate(&apps, &free));
        assert!(codes.is_empty(), "unexpected: {codes:?}");
    }

    #[test]
    fn malformed_steam_url_is_its_own_finding() {
        let free = HashMap::from([(
            "https://a.itch.io/g".to_string(),
            FreeGame::new("https://a.itch.io/g", Platform::Itch, "Game")
                .with_steam_url("https://example.com/not-steam"),
        )]);

        let codes = errors(&validate(&HashMap::new(), &free));
        assert!(codes.contains(&FindingCode::MalformedSteamUrl));
        assert!(!codes.contains(&FindingCode::AsymmetricSteamLink));
    }

    #[test]
    fn video_reference_to_missing_game() {
        let video = Video::new("v1", "Gems", Utc::now())
            .with_refs(vec![GameRef::new(Platform::Steam, "404")]);
        let apps = HashMap::new();
        let free = HashMap::new();
        let findings = ReferenceValidator.validate(&Snapshot {
            apps: &apps,
            free: &free,
            videos: vec![&video],
        });

        assert!(
            findings
                .iter()
                .any(|f| f.code == FindingCode::VideoReferencesMissingSteamGame
                    && f.entity == "v1")
        );
    }

    #[test]
    fn warnings_do_not_block() {
        let mut apps = HashMap::new();
        let mut noisy = SteamApp::new("1", "Odd");
        noisy.is_stub = true;
        noisy.reviews = ReviewStats {
            percent_positive: Some(140),
            ..ReviewStats::default()
        };
        apps.insert("1".to_string(), noisy);

        let findings = validate(&apps, &HashMap::new());
        assert!(!findings.is_empty());
        assert!(!ReferenceValidator::has_errors(&findings));
    }
}
