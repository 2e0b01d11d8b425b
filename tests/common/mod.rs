use simstudio::{
    sim::Vec2,
    spec::{
        ActionSpace, AgentSpec, Condition, EnvSpec, ObjectKind, ObjectSpec, RewardRule, RuleId,
        RuleSet, TerminationRule, WorldSpec,
    },
};

/// Grid world with one agent, a goal, optional walls, a goal bonus, and an
/// optional per-step penalty. The shape every scenario starts from.
pub fn grid_spec(
    size: f64,
    agent: [f64; 2],
    goal: [f64; 2],
    walls: &[[f64; 2]],
    step_penalty: Option<f64>,
    timeout_steps: u32,
) -> EnvSpec {
    let mut objects = vec![ObjectSpec::new(
        "goal-1",
        ObjectKind::Goal,
        Vec2::new(goal[0], goal[1]),
    )];
    for (i, wall) in walls.iter().enumerate() {
        objects.push(ObjectSpec::new(
            format!("wall-{i}"),
            ObjectKind::Wall,
            Vec2::new(wall[0], wall[1]),
        ));
    }

    let mut rewards = vec![RewardRule {
        id: RuleId::from("r-goal"),
        condition: Condition::ReachGoal,
        reward: 10.0,
    }];
    if let Some(penalty) = step_penalty {
        rewards.push(RewardRule {
            id: RuleId::from("r-step"),
            condition: Condition::Step,
            reward: penalty,
        });
    }

    EnvSpec {
        name: Some("scenario".to_string()),
        world: WorldSpec::grid(size, size),
        agents: vec![AgentSpec::new("agent-1", Vec2::new(agent[0], agent[1]))],
        objects,
        action_space: ActionSpace::compass(),
        rules: RuleSet {
            rewards,
            terminations: vec![TerminationRule {
                id: RuleId::from("t-timeout"),
                condition: Condition::Timeout {
                    steps: Some(timeout_steps),
                },
            }],
            events: Vec::new(),
        },
    }
}

/// Continuous 10x10 world with one agent and one goal.
pub fn continuous_spec(agent: [f64; 2], goal: [f64; 2]) -> EnvSpec {
    EnvSpec {
        name: Some("continuous-scenario".to_string()),
        world: WorldSpec::continuous(10.0, 10.0),
        agents: vec![AgentSpec::new("agent-1", Vec2::new(agent[0], agent[1]))],
        objects: vec![ObjectSpec::new(
            "goal-1",
            ObjectKind::Goal,
            Vec2::new(goal[0], goal[1]),
        )],
        action_space: ActionSpace::planar(),
        rules: RuleSet {
            rewards: vec![RewardRule {
                id: RuleId::from("r-goal"),
                condition: Condition::ReachGoal,
                reward: 10.0,
            }],
            terminations: vec![TerminationRule {
                id: RuleId::from("t-timeout"),
                condition: Condition::Timeout { steps: Some(200) },
            }],
            events: Vec::new(),
        },
    }
}

/// Grid world with two agents stacked vertically and a far-away goal.
pub fn two_agent_spec() -> EnvSpec {
    EnvSpec {
        name: Some("pair".to_string()),
        world: WorldSpec::grid(4.0, 4.0),
        agents: vec![
            AgentSpec::new("agentA", Vec2::new(0.0, 0.0)),
            AgentSpec::new("agentB", Vec2::new(0.0, 1.0)),
        ],
        objects: vec![ObjectSpec::new(
            "goal-1",
            ObjectKind::Goal,
            Vec2::new(3.0, 3.0),
        )],
        action_space: ActionSpace::compass(),
        rules: RuleSet {
            rewards: vec![RewardRule {
                id: RuleId::from("r-step"),
                condition: Condition::Step,
                reward: -0.1,
            }],
            terminations: vec![TerminationRule {
                id: RuleId::from("t-timeout"),
                condition: Condition::Timeout { steps: Some(50) },
            }],
            events: Vec::new(),
        },
    }
}
