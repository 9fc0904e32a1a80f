//! HelloWorld CRD
//!
//! Declares a message that a companion Pod echoes.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// API group served for the HelloWorld kind
pub const GROUP: &str = "release-exercise.sourcegraph.com";

/// API version served for the HelloWorld kind
pub const VERSION: &str = "v1";

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[kube(
    group = "release-exercise.sourcegraph.com",
    version = "v1",
    kind = "HelloWorld",
    plural = "helloworlds",
    shortname = "hw",
    namespaced,
    status = "HelloWorldStatus",
    printcolumn = r#"{"name":"Message","type":"string","jsonPath":".spec.message"}"#,
    printcolumn = r#"{"name":"Pod","type":"string","jsonPath":".status.podName"}"#,
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.state"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct HelloWorldSpec {
    /// Message echoed by the managed Pod. May be empty.
    pub message: String,
}

/// Lifecycle of the managed Pod as last observed by the controller
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
pub enum HelloWorldState {
    /// Not reconciled yet
    #[default]
    Pending,

    /// Managed Pod exists and matches the spec
    Provisioned,

    /// Drifted Pod is being deleted; a replacement follows
    Replacing,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HelloWorldStatus {
    /// Generation of the spec the controller last acted on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Name of the managed Pod
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_name: Option<String>,

    /// Current lifecycle state
    #[serde(default)]
    pub state: HelloWorldState,
}
