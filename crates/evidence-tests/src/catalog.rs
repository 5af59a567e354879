use evidence_core::SuiteType;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Matcher {
    /// Substring containment.
    Includes(&'static str),
    /// Multi-line pattern matched against the whole file.
    Regex(&'static str),
}

#[derive(Clone, Debug)]
pub struct AssertionDefinition {
    pub assertion_id: &'static str,
    pub name: &'static str,
    /// Relative to the source root.
    pub file_path: &'static str,
    pub matcher: Matcher,
    pub expected: &'static str,
}

#[derive(Clone, Debug)]
pub struct TestDefinition {
    pub test_id: &'static str,
    pub source_path: &'static str,
    pub suite: SuiteType,
    pub verification_command: &'static str,
    pub assertions: Vec<AssertionDefinition>,
}

pub fn definitions_for(suite: SuiteType) -> Vec<TestDefinition> {
    match suite {
        SuiteType::Unit => unit_suite(),
        SuiteType::E2e => e2e_suite(),
    }
}

pub fn unit_suite() -> Vec<TestDefinition> {
    vec![
        TestDefinition {
            test_id: "permission-analyzer-unit",
            source_path: "apps/api/src/permissions/permission-analyzer.test.ts",
            suite: SuiteType::Unit,
            verification_command: "npm --prefix apps/api run test -- permission-analyzer",
            assertions: vec![
                AssertionDefinition {
                    assertion_id: "pa-default-deny",
                    name: "Permission analyzer denies by default",
                    file_path: "apps/api/src/permissions/permission-analyzer.ts",
                    matcher: Matcher::Includes("const DEFAULT_DECISION = 'deny'"),
                    expected: "default decision is deny",
                },
                AssertionDefinition {
                    assertion_id: "pa-exported-entrypoint",
                    name: "Permission analyzer exposes analyzePermissions",
                    file_path: "apps/api/src/permissions/permission-analyzer.ts",
                    matcher: Matcher::Regex(r"^export function analyzePermissions\("),
                    expected: "module exports analyzePermissions()",
                },
                AssertionDefinition {
                    assertion_id: "pa-guardian-scope-test",
                    name: "Unit test covers guardian-only scopes",
                    file_path: "apps/api/src/permissions/permission-analyzer.test.ts",
                    matcher: Matcher::Regex(r#"^\s*it\(['"]rejects guardian scopes for child accounts"#),
                    expected: "test case for guardian scopes on child accounts",
                },
            ],
        },
        TestDefinition {
            test_id: "ttl-indexes-api-unit",
            source_path: "apps/api/src/db/ttl-indexes.test.ts",
            suite: SuiteType::Unit,
            verification_command: "npm --prefix apps/api run test -- ttl-indexes",
            assertions: vec![
                AssertionDefinition {
                    assertion_id: "ttl-location-expiry",
                    name: "Location history expires",
                    file_path: "apps/api/src/db/indexes.ts",
                    matcher: Matcher::Regex(r"locationHistory[\s\S]*?expireAfterSeconds:\s*\d+"),
                    expected: "locationHistory index declares expireAfterSeconds",
                },
                AssertionDefinition {
                    assertion_id: "ttl-indexes-registered",
                    name: "TTL indexes are created on startup",
                    file_path: "apps/api/src/server.ts",
                    matcher: Matcher::Includes("await createTtlIndexes("),
                    expected: "server bootstrap awaits createTtlIndexes()",
                },
            ],
        },
    ]
}

pub fn e2e_suite() -> Vec<TestDefinition> {
    vec![
        TestDefinition {
            test_id: "sos-e2e",
            source_path: "apps/mobile/e2e/sos.e2e.ts",
            suite: SuiteType::E2e,
            verification_command: "npm --prefix apps/mobile run e2e -- sos",
            assertions: vec![
                AssertionDefinition {
                    assertion_id: "sos-trigger-flow",
                    name: "E2E flow triggers SOS from the home screen",
                    file_path: "apps/mobile/e2e/sos.e2e.ts",
                    matcher: Matcher::Includes("await triggerSos("),
                    expected: "e2e flow calls triggerSos()",
                },
                AssertionDefinition {
                    assertion_id: "sos-alert-dispatch",
                    name: "SOS alerts are dispatched server-side",
                    file_path: "apps/api/src/sos/dispatch.ts",
                    matcher: Matcher::Regex(r"^export async function dispatchSosAlert\("),
                    expected: "api exports dispatchSosAlert()",
                },
                AssertionDefinition {
                    assertion_id: "sos-location-attached",
                    name: "SOS alert carries last known location",
                    file_path: "apps/api/src/sos/dispatch.ts",
                    matcher: Matcher::Includes("lastKnownLocation"),
                    expected: "alert payload includes lastKnownLocation",
                },
            ],
        },
        TestDefinition {
            test_id: "device-sync-e2e",
            source_path: "apps/mobile/e2e/device-sync.e2e.ts",
            suite: SuiteType::E2e,
            verification_command: "npm --prefix apps/mobile run e2e -- device-sync",
            assertions: vec![
                AssertionDefinition {
                    assertion_id: "ds-conflict-resolution",
                    name: "Sync conflicts are resolved deterministically",
                    file_path: "apps/mobile/src/sync/engine.ts",
                    matcher: Matcher::Includes("resolveSyncConflict("),
                    expected: "sync engine calls resolveSyncConflict()",
                },
                AssertionDefinition {
                    assertion_id: "ds-offline-replay",
                    name: "Offline changes are replayed after reconnect",
                    file_path: "apps/mobile/e2e/device-sync.e2e.ts",
                    matcher: Matcher::Regex(r#"^\s*it\(['"]replays queued changes"#),
                    expected: "e2e case replays queued offline changes",
                },
                AssertionDefinition {
                    assertion_id: "ds-payload-encryption",
                    name: "Sync payloads are encrypted before upload",
                    file_path: "apps/mobile/src/sync/engine.ts",
                    matcher: Matcher::Includes("encryptPayload("),
                    expected: "sync engine calls encryptPayload()",
                },
            ],
        },
    ]
}
