use crate::{
    error::{SpecError, StudioResult},
    spec::{
        action::ActionSpace,
        condition::Condition,
        domain::EnvSpec,
    },
};

// ================================================================================================
// Caps
// ================================================================================================

/// Largest permitted world area (`width * height`).
pub const MAX_WORLD_AREA: f64 = 1_000_000.0;
/// Largest permitted object count.
pub const MAX_OBJECTS: usize = 10_000;
/// Largest permitted agent count.
pub const MAX_AGENTS: usize = 100;
/// Largest permitted discrete-action vocabulary.
pub const MAX_DISCRETE_ACTIONS: usize = 1_000;
/// Longest permitted identifier or name after sanitization.
pub const MAX_STRING_LEN: usize = 256;

// ================================================================================================
// Structural Guard
// ================================================================================================

/// First line of defence against adversarial payloads: rejects specs whose
/// dimensions or cardinalities exceed the hard caps before any deeper work.
pub fn structural_guard(spec: &EnvSpec) -> StudioResult<()> {
    if !spec.world.width.is_finite() || !spec.world.height.is_finite() {
        return Err(SpecError::Security("world dimensions must be finite".to_string()).into());
    }
    if spec.world.area() > MAX_WORLD_AREA {
        return Err(SpecError::Security(format!(
            "world area {} exceeds cap {MAX_WORLD_AREA}",
            spec.world.area()
        ))
        .into());
    }
    if spec.objects.len() > MAX_OBJECTS {
        return Err(SpecError::Security(format!(
            "{} objects exceed cap {MAX_OBJECTS}",
            spec.objects.len()
        ))
        .into());
    }
    if spec.agents.len() > MAX_AGENTS {
        return Err(SpecError::Security(format!(
            "{} agents exceed cap {MAX_AGENTS}",
            spec.agents.len()
        ))
        .into());
    }
    if let ActionSpace::Discrete { actions } = &spec.action_space
        && actions.len() > MAX_DISCRETE_ACTIONS
    {
        return Err(SpecError::Security(format!(
            "{} discrete actions exceed cap {MAX_DISCRETE_ACTIONS}",
            actions.len()
        ))
        .into());
    }
    Ok(())
}

// ================================================================================================
// Validation
// ================================================================================================

/// Checks every invariant of the data model, failing on the first violation
/// with the offending field path.
pub fn validate(spec: &EnvSpec) -> StudioResult<()> {
    structural_guard(spec)?;

    if spec.world.width <= 0.0 {
        return Err(SpecError::validation("world.width", "must be positive").into());
    }
    if spec.world.height <= 0.0 {
        return Err(SpecError::validation("world.height", "must be positive").into());
    }
    if let Some(cell) = spec.world.cell_size
        && (!cell.is_finite() || cell <= 0.0)
    {
        return Err(SpecError::validation("world.cellSize", "must be positive").into());
    }

    if spec.agents.is_empty() {
        return Err(SpecError::validation("agents", "environment must have at least one agent").into());
    }
    let mut seen_agents = std::collections::HashSet::new();
    for (i, agent) in spec.agents.iter().enumerate() {
        if agent.id.as_str().is_empty() {
            return Err(SpecError::validation(format!("agents[{i}].id"), "must not be empty").into());
        }
        if !seen_agents.insert(agent.id.clone()) {
            return Err(SpecError::validation(
                format!("agents[{i}].id"),
                format!("duplicate agent id '{}'", agent.id),
            )
            .into());
        }
        if !spec.world.contains(agent.position) {
            return Err(SpecError::validation(
                format!("agents[{i}].position"),
                format!(
                    "({}, {}) is out of bounds",
                    agent.position.x, agent.position.y
                ),
            )
            .into());
        }
    }

    for (i, object) in spec.objects.iter().enumerate() {
        if !spec.world.contains(object.position) {
            return Err(SpecError::validation(
                format!("objects[{i}].position"),
                format!(
                    "({}, {}) is out of bounds",
                    object.position.x, object.position.y
                ),
            )
            .into());
        }
    }

    match &spec.action_space {
        ActionSpace::Discrete { actions } => {
            if actions.is_empty() {
                return Err(SpecError::validation(
                    "actionSpace.actions",
                    "discrete action space must not be empty",
                )
                .into());
            }
            if actions.iter().any(|a| a.is_empty()) {
                return Err(SpecError::validation(
                    "actionSpace.actions",
                    "action names must not be empty",
                )
                .into());
            }
        }
        ActionSpace::Continuous { dims, range } => {
            if *dims == 0 {
                return Err(SpecError::validation(
                    "actionSpace.dims",
                    "continuous action space needs at least one dimension",
                )
                .into());
            }
            if !range[0].is_finite() || !range[1].is_finite() || range[0] >= range[1] {
                return Err(SpecError::validation(
                    "actionSpace.range",
                    "range must be a finite [lo, hi] with lo < hi",
                )
                .into());
            }
        }
    }

    if spec.rules.rewards.is_empty() {
        return Err(SpecError::validation(
            "rules.rewards",
            "no reward rules defined; add at least one before running rollouts",
        )
        .into());
    }
    if spec.rules.terminations.is_empty() {
        return Err(SpecError::validation(
            "rules.terminations",
            "no termination rules defined; add at least one before running rollouts",
        )
        .into());
    }
    let mut seen_rules = std::collections::HashSet::new();
    for id in spec.rules.ids() {
        if !seen_rules.insert(id.clone()) {
            return Err(SpecError::validation(
                "rules",
                format!("duplicate rule id '{id}'"),
            )
            .into());
        }
    }
    for (i, rule) in spec.rules.rewards.iter().enumerate() {
        if !rule.reward.is_finite() {
            return Err(SpecError::validation(
                format!("rules.rewards[{i}].reward"),
                "must be finite",
            )
            .into());
        }
    }

    Ok(())
}

// ================================================================================================
// Sanitization
// ================================================================================================

/// Clamps numeric fields into allowed ranges, escapes string fields, and
/// truncates lists to the caps. Idempotent: sanitizing a sanitized spec is
/// the identity.
pub fn sanitize(spec: &EnvSpec) -> EnvSpec {
    let mut out = spec.clone();

    out.world.width = clamp_dimension(out.world.width);
    out.world.height = clamp_dimension(out.world.height);
    if let Some(cell) = out.world.cell_size {
        out.world.cell_size = Some(if cell.is_finite() {
            cell.clamp(0.01, out.world.width.max(1.0))
        } else {
            1.0
        });
    }

    out.name = out.name.map(|n| sanitize_text(&n));

    out.agents.truncate(MAX_AGENTS);
    for agent in &mut out.agents {
        agent.id.0 = sanitize_text(agent.id.as_str());
        agent.position = out.world.clamp(agent.position.or_zero());
        agent.rotation = agent.rotation.filter(|r| r.is_finite());
        agent.sensors.truncate(16);
        for sensor in &mut agent.sensors {
            *sensor = sanitize_text(sensor);
        }
    }

    out.objects.truncate(MAX_OBJECTS);
    for object in &mut out.objects {
        object.id.0 = sanitize_text(object.id.as_str());
        object.position = out.world.clamp(object.position.or_zero());
        object.rotation = object.rotation.filter(|r| r.is_finite());
    }

    match &mut out.action_space {
        ActionSpace::Discrete { actions } => {
            actions.truncate(MAX_DISCRETE_ACTIONS);
            for action in actions.iter_mut() {
                *action = sanitize_text(action);
            }
        }
        ActionSpace::Continuous { dims, range } => {
            *dims = (*dims).clamp(1, 16);
            if !range[0].is_finite() || !range[1].is_finite() || range[0] >= range[1] {
                *range = [-1.0, 1.0];
            }
        }
    }

    let max_reach = out.world.width.max(out.world.height);
    for rule in &mut out.rules.rewards {
        rule.id.0 = sanitize_text(rule.id.as_str());
        rule.reward = clamp_reward(rule.reward);
        sanitize_condition(&mut rule.condition, max_reach);
    }
    for rule in &mut out.rules.terminations {
        rule.id.0 = sanitize_text(rule.id.as_str());
        sanitize_condition(&mut rule.condition, max_reach);
    }
    for rule in &mut out.rules.events {
        rule.id.0 = sanitize_text(rule.id.as_str());
        rule.name = sanitize_text(&rule.name);
        sanitize_condition(&mut rule.condition, max_reach);
    }

    out
}

fn sanitize_condition(condition: &mut Condition, max_reach: f64) {
    match condition {
        Condition::AgentAtPosition {
            agent_id,
            position,
            tolerance,
        } => {
            agent_id.0 = sanitize_text(agent_id.as_str());
            *position = position.or_zero();
            *tolerance = if tolerance.is_finite() {
                tolerance.clamp(0.0, max_reach)
            } else {
                crate::spec::condition::DEFAULT_TOLERANCE
            };
        }
        Condition::AgentAtObject {
            agent_id,
            object_id,
        } => {
            agent_id.0 = sanitize_text(agent_id.as_str());
            object_id.0 = sanitize_text(object_id.as_str());
        }
        Condition::Collision { agent_id } => {
            agent_id.0 = sanitize_text(agent_id.as_str());
        }
        Condition::Event { name, agent_id } => {
            *name = sanitize_text(name);
            agent_id.0 = sanitize_text(agent_id.as_str());
        }
        Condition::Step
        | Condition::Timeout { .. }
        | Condition::ReachGoal
        | Condition::HitTrap
        | Condition::CollectKey => {}
    }
}

/// Strips control characters and markup delimiters, trims whitespace, and
/// truncates to [`MAX_STRING_LEN`] characters.
pub fn sanitize_text(input: &str) -> String {
    input
        .trim()
        .chars()
        .filter(|c| !c.is_control() && *c != '<' && *c != '>')
        .take(MAX_STRING_LEN)
        .collect()
}

fn clamp_dimension(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(1.0, 1_000.0)
    } else {
        1.0
    }
}

fn clamp_reward(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(-1_000_000.0, 1_000_000.0)
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::StudioError,
        sim::Vec2,
        spec::{
            domain::{AgentSpec, ObjectKind, ObjectSpec, RuleId},
            rules::{RewardRule, RuleSet, TerminationRule},
            world::WorldSpec,
        },
    };

    fn spec() -> EnvSpec {
        EnvSpec {
            name: None,
            world: WorldSpec::grid(5.0, 5.0),
            agents: vec![AgentSpec::new("a", Vec2::new(0.0, 0.0))],
            objects: vec![ObjectSpec::new(
                "goal",
                ObjectKind::Goal,
                Vec2::new(4.0, 4.0),
            )],
            action_space: ActionSpace::compass(),
            rules: RuleSet {
                rewards: vec![RewardRule {
                    id: RuleId::from("r1"),
                    condition: Condition::ReachGoal,
                    reward: 10.0,
                }],
                terminations: vec![TerminationRule {
                    id: RuleId::from("t1"),
                    condition: Condition::Timeout { steps: Some(50) },
                }],
                events: Vec::new(),
            },
        }
    }

    fn field_of(err: StudioError) -> String {
        match err {
            StudioError::Spec(SpecError::Validation { field, .. }) => field,
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn valid_spec_passes() {
        validate(&spec()).unwrap();
    }

    #[test]
    fn zero_width_is_rejected_with_field_path() {
        let mut s = spec();
        s.world.width = 0.0;
        assert_eq!(field_of(validate(&s).unwrap_err()), "world.width");
    }

    #[test]
    fn out_of_bounds_agent_is_rejected() {
        let mut s = spec();
        s.agents[0].position = Vec2::new(9.0, 0.0);
        assert_eq!(field_of(validate(&s).unwrap_err()), "agents[0].position");
    }

    #[test]
    fn duplicate_agent_ids_are_rejected() {
        let mut s = spec();
        s.agents.push(AgentSpec::new("a", Vec2::new(1.0, 1.0)));
        assert_eq!(field_of(validate(&s).unwrap_err()), "agents[1].id");
    }

    #[test]
    fn missing_reward_rules_are_rejected() {
        let mut s = spec();
        s.rules.rewards.clear();
        assert_eq!(field_of(validate(&s).unwrap_err()), "rules.rewards");
    }

    #[test]
    fn missing_termination_rules_are_rejected() {
        let mut s = spec();
        s.rules.terminations.clear();
        assert_eq!(field_of(validate(&s).unwrap_err()), "rules.terminations");
    }

    #[test]
    fn duplicate_rule_ids_are_rejected() {
        let mut s = spec();
        s.rules.terminations[0].id = RuleId::from("r1");
        assert_eq!(field_of(validate(&s).unwrap_err()), "rules");
    }

    #[test]
    fn oversized_world_trips_the_guard() {
        let mut s = spec();
        s.world.width = 2_000.0;
        s.world.height = 2_000.0;
        let err = structural_guard(&s).unwrap_err();
        assert_eq!(err.code(), "SECURITY_ERROR");
    }

    #[test]
    fn oversized_action_vocabulary_trips_the_guard() {
        let mut s = spec();
        s.action_space = ActionSpace::Discrete {
            actions: (0..=MAX_DISCRETE_ACTIONS).map(|i| format!("a{i}")).collect(),
        };
        assert!(structural_guard(&s).is_err());
    }

    #[test]
    fn sanitize_clamps_positions_into_bounds() {
        let mut s = spec();
        s.agents[0].position = Vec2::new(42.0, -3.0);
        let clean = sanitize(&s);
        assert_eq!(clean.agents[0].position, Vec2::new(4.0, 0.0));
    }

    #[test]
    fn sanitize_strips_markup_from_strings() {
        let mut s = spec();
        s.agents[0].id.0 = "  <script>alpha</script> ".to_string();
        let clean = sanitize(&s);
        assert_eq!(clean.agents[0].id.as_str(), "scriptalpha/script");
    }

    #[test]
    fn sanitize_replaces_non_finite_rewards() {
        let mut s = spec();
        s.rules.rewards[0].reward = f64::NAN;
        let clean = sanitize(&s);
        assert_eq!(clean.rules.rewards[0].reward, 0.0);
    }

    #[test]
    fn sanitize_is_idempotent() {
        let mut s = spec();
        s.agents[0].position = Vec2::new(42.0, -3.0);
        s.agents[0].id.0 = " <b>a</b> ".to_string();
        s.rules.rewards[0].reward = f64::INFINITY;
        let once = sanitize(&s);
        let twice = sanitize(&once);
        assert_eq!(once, twice);
    }
}
