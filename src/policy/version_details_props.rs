//! Consistency of `eng/Version.Details.props` with the other version files.
//!
//! `Version.Details.props` is generated from `Version.Details.xml` and must be
//! imported by `Versions.props` without any of its properties being
//! redeclared there.

use super::{MergePolicy, MergePolicyEvaluationResult, PullRequestUpdateSummary};
use crate::codeflow::Direction;
use crate::error::{Error, Result};
use crate::remote::Remote;
use crate::version_files::version_details::VersionDetails;
use crate::version_files::{PropsFile, VERSIONS_PROPS, VERSION_DETAILS_PROPS, VERSION_DETAILS_XML};
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::fmt::Write;

pub const NAME: &str = "VersionDetailsProps";

const PROPS_FILE_NAME: &str = "Version.Details.props";
const VERSIONS_FILE_NAME: &str = "Versions.props";
const XML_FILE_NAME: &str = "Version.Details.xml";

#[derive(Debug, Default)]
pub struct VersionDetailsPropsPolicy;

fn has_import(versions: &PropsFile) -> bool {
    let condition = format!("Exists('{}')", PROPS_FILE_NAME);
    versions.imports.iter().any(|(project, cond)| {
        project == PROPS_FILE_NAME && cond.as_deref().is_none_or(|c| c == condition)
    })
}

fn validation_failed(policy: &VersionDetailsPropsPolicy, message: String) -> MergePolicyEvaluationResult {
    policy.fail(
        format!("#### ❌ {}: Validation Failed", policy.display_name()),
        message,
    )
}

impl VersionDetailsPropsPolicy {
    async fn check_files(
        &self,
        pr: &PullRequestUpdateSummary,
        remote: &dyn Remote,
        props: &PropsFile,
    ) -> Result<MergePolicyEvaluationResult> {
        let versions_text = remote
            .get_file_contents(VERSIONS_PROPS, &pr.target_repo_url, &pr.head_branch)
            .await?;
        let versions = PropsFile::parse(VERSIONS_PROPS, &versions_text)?;

        let declared: BTreeSet<&String> = props.properties.keys().collect();
        let conflicting: Vec<&String> = versions
            .properties
            .keys()
            .filter(|name| declared.contains(name))
            .collect();
        let imported = has_import(&versions);

        if !conflicting.is_empty() || !imported {
            let mut message = format!("Validation issues found with `{}` file:\n\n", VERSIONS_FILE_NAME);
            if !conflicting.is_empty() {
                let _ = writeln!(
                    message,
                    "**Conflicting Properties:** Properties from `{}` should not be present in `{}`.",
                    PROPS_FILE_NAME, VERSIONS_FILE_NAME
                );
                message.push_str("The following conflicting properties were found:\n");
                for name in &conflicting {
                    let _ = writeln!(message, "- `{}`", name);
                }
                message.push('\n');
            }
            if !imported {
                let _ = writeln!(
                    message,
                    "**Missing Import:** The `{}` file is missing the required import statement for `{}`.\n",
                    VERSIONS_FILE_NAME, PROPS_FILE_NAME
                );
            }
            message.push_str("**Action Required:**\n");
            if !conflicting.is_empty() {
                let _ = writeln!(
                    message,
                    "- Remove the conflicting properties from `{}`.",
                    VERSIONS_FILE_NAME
                );
            }
            if !imported {
                let _ = writeln!(
                    message,
                    "- Add the following import statement at the beginning of your `{}` file:",
                    VERSIONS_FILE_NAME
                );
                message.push_str("  ```xml\n");
                let _ = writeln!(
                    message,
                    "  <Import Project=\"{p}\" Condition=\"Exists('{p}')\" />",
                    p = PROPS_FILE_NAME
                );
                message.push_str("  ```\n");
            }
            return Ok(validation_failed(self, message));
        }

        let xml = remote
            .get_file_contents(VERSION_DETAILS_XML, &pr.target_repo_url, &pr.head_branch)
            .await?;
        let details = VersionDetails::parse(VERSION_DETAILS_XML, &xml)?;
        let expected = details.expected_properties();

        let missing: Vec<(&String, &String)> = expected
            .iter()
            .filter(|(name, _)| !props.properties.contains_key(*name))
            .collect();
        let orphaned: Vec<&String> = props
            .properties
            .keys()
            .filter(|name| !expected.contains_key(*name))
            .collect();

        if missing.is_empty() && orphaned.is_empty() {
            return Ok(self.succeed(format!("{}: All validation checks passed", self.display_name())));
        }

        let mut message = format!(
            "There is a mismatch between dependencies in `{}` and properties in `{}`.\n\n",
            XML_FILE_NAME, PROPS_FILE_NAME
        );
        if !missing.is_empty() {
            let _ = writeln!(
                message,
                "**Missing Properties:** The following dependencies are missing corresponding properties in `{}`:",
                PROPS_FILE_NAME
            );
            for (name, value) in &missing {
                let _ = writeln!(message, "- Add `<{name}>{value}</{name}>`");
            }
            message.push('\n');
        }
        if !orphaned.is_empty() {
            let _ = writeln!(
                message,
                "**Orphaned Properties:** The following properties in `{}` do not correspond to any dependency:",
                PROPS_FILE_NAME
            );
            for name in &orphaned {
                let _ = writeln!(message, "- Remove `<{name}>...</{name}>`");
            }
            message.push('\n');
        }
        Ok(validation_failed(self, message))
    }
}

#[async_trait]
impl MergePolicy for VersionDetailsPropsPolicy {
    fn name(&self) -> &str {
        NAME
    }

    fn display_name(&self) -> String {
        format!("{} Validation Merge Policy", PROPS_FILE_NAME)
    }

    async fn evaluate(&self, pr: &PullRequestUpdateSummary, remote: &dyn Remote) -> Result<MergePolicyEvaluationResult> {
        if pr.direction == Some(Direction::Forward) {
            return Ok(self.succeed(format!("{}: doesn't apply to this subscription", self.display_name())));
        }

        let props = match remote
            .get_file_contents(VERSION_DETAILS_PROPS, &pr.target_repo_url, &pr.head_branch)
            .await
        {
            Ok(text) => text,
            Err(Error::NotFound { .. }) if pr.direction.is_none() => {
                return Ok(self.succeed(format!(
                    "{}: {} file not found, skipping validation.",
                    self.display_name(),
                    PROPS_FILE_NAME
                )));
            }
            Err(Error::NotFound { .. }) => {
                return Ok(self.fail(
                    format!("{}: {} file must exist in all VMR repos", self.display_name(), PROPS_FILE_NAME),
                    "",
                ));
            }
            Err(e) => {
                return Ok(self.fail_transiently(
                    format!("Failed to evaluate {}", self.display_name()),
                    format!("An error occurred while trying to read the {} file: {}", VERSION_DETAILS_PROPS, e),
                ));
            }
        };
        let props = match PropsFile::parse(VERSION_DETAILS_PROPS, &props) {
            Ok(props) => props,
            Err(_) => {
                return Ok(self.fail(
                    format!("Failed to parse {}", PROPS_FILE_NAME),
                    format!(
                        "The {} file is not a valid XML document. Please ensure it is well-formed.",
                        VERSION_DETAILS_PROPS
                    ),
                ));
            }
        };

        match self.check_files(pr, remote, &props).await {
            Ok(result) => Ok(result),
            Err(e) => Ok(self.fail_transiently(
                format!("Failed to evaluate {}", self.display_name()),
                format!("An error occurred while evaluating {}: {}", self.display_name(), e),
            )),
        }
    }
}
