//! Presence rules: required blocks, project metadata and LLM providers

use crate::diagnostic::{Code, Findings};
use crate::ir::{Agent, LlmConfig, Project, SUPPORTED_PROVIDERS, SUPPORTED_SPEC_VERSIONS};

pub(super) fn check_project(project: &Project, findings: &mut Findings) {
    if project.name.is_empty() {
        findings.error(
            Code::MissingBlock,
            Some(project.position),
            "<project> requires a name",
        );
    }
    match project.spec_version.as_deref() {
        None => findings.error(
            Code::UnsupportedVersion,
            Some(project.position),
            format!(
                "<project> does not declare spec_version (supported: {})",
                SUPPORTED_SPEC_VERSIONS.join(", ")
            ),
        ),
        Some(version) if !SUPPORTED_SPEC_VERSIONS.contains(&version) => findings.error(
            Code::UnsupportedVersion,
            Some(project.position),
            format!(
                "unsupported spec_version '{}' (supported: {})",
                version,
                SUPPORTED_SPEC_VERSIONS.join(", ")
            ),
        ),
        Some(_) => {}
    }
    if let Some(llm) = &project.llm {
        check_llm(llm, findings);
    }
    if project.server.auth_env.is_some() && project.server.auth_header.is_empty() {
        findings.error(
            Code::MissingBlock,
            Some(project.position),
            "<server> sets auth_env but no auth_header",
        );
    }
}

pub(super) fn check_agent(agent: &Agent, project: Option<&Project>, findings: &mut Findings) {
    if agent.name.is_empty() {
        findings.error(
            Code::MissingBlock,
            Some(agent.position),
            "<agent> requires a name",
        );
    }
    if agent.state_block.is_none() {
        findings.error(
            Code::MissingBlock,
            Some(agent.position),
            format!("agent '{}' has no <state> block", agent.name),
        );
    }
    if agent.graph_block.is_none() {
        findings.error(
            Code::MissingBlock,
            Some(agent.position),
            format!("agent '{}' has no <graph> block", agent.name),
        );
    }
    if let Some(llm) = &agent.llm {
        check_llm(llm, findings);
    }
    if agent.has_llm_nodes() && agent.effective_llm(project).is_none() {
        findings.error(
            Code::MissingBlock,
            Some(agent.position),
            format!(
                "agent '{}' has llm nodes but neither the project nor the agent configures an <llm>",
                agent.name
            ),
        );
    }
}

fn check_llm(llm: &LlmConfig, findings: &mut Findings) {
    if llm.provider.is_empty() {
        findings.error(
            Code::MissingBlock,
            Some(llm.position),
            "<llm> requires a provider",
        );
    } else if !SUPPORTED_PROVIDERS.contains(&llm.provider.as_str()) {
        findings.error(
            Code::UnknownProvider,
            Some(llm.position),
            format!(
                "unknown LLM provider '{}' (supported: {})",
                llm.provider,
                SUPPORTED_PROVIDERS.join(", ")
            ),
        );
    }
    if llm.model.is_empty() {
        findings.error(Code::MissingBlock, Some(llm.position), "<llm> requires a model");
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::model::build_project;
    use crate::tree::parse;
    use rstest::rstest;

    fn project_codes(src: &str) -> Vec<Code> {
        let root = parse(src).unwrap();
        let project = build_project(&root, "agents/_project.amk").model.unwrap();
        let mut findings = Findings::new("agents/_project.amk");
        check_project(&project, &mut findings);
        codes(&findings.into_vec())
    }

    #[rstest]
    #[case(r#"<project name="p" spec_version="2.0"/>"#, vec![])]
    #[case(r#"<project name="p"/>"#, vec![Code::UnsupportedVersion])]
    #[case(r#"<project name="p" spec_version="1.0"/>"#, vec![Code::UnsupportedVersion])]
    #[case(r#"<project spec_version="2.0"/>"#, vec![Code::MissingBlock])]
    #[case(
        r#"<project name="p" spec_version="2.0"><config><llm provider="skynet" model="m"/></config></project>"#,
        vec![Code::UnknownProvider]
    )]
    #[case(
        r#"<project name="p" spec_version="2.0"><config><llm provider="openai"/></config></project>"#,
        vec![Code::MissingBlock]
    )]
    fn test_project_presence(#[case] src: &str, #[case] expected: Vec<Code>) {
        assert_eq!(project_codes(src), expected);
    }

    #[test]
    fn test_missing_blocks_reported_together() {
        let diagnostics = findings(r#"<agent name="empty"/>"#);
        assert_eq!(codes(&diagnostics), vec![Code::MissingBlock, Code::MissingBlock]);
        assert!(diagnostics[0].message.contains("<state>"));
        assert!(diagnostics[1].message.contains("<graph>"));
    }

    #[test]
    fn test_agent_provider_override_is_checked() {
        let diagnostics = findings(
            r#"<agent name="a"><config><llm provider="acme" model="x"/></config><state/><graph/></agent>"#,
        );
        assert_eq!(codes(&diagnostics), vec![Code::UnknownProvider]);
    }

    #[test]
    fn test_llm_nodes_need_a_provider() {
        let agent = agent(
            r#"<agent name="a"><state/><graph><node id="n" type="llm"/></graph></agent>"#,
        );
        let mut findings = Findings::new("agents/test.amk");
        check_agent(&agent, None, &mut findings);
        let diagnostics = findings.into_vec();
        assert_eq!(codes(&diagnostics), vec![Code::MissingBlock]);
        assert!(diagnostics[0].message.contains("llm nodes"));
    }
}
