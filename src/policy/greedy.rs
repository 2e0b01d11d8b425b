use rand::{Rng, SeedableRng, rngs::StdRng};

use crate::{
    error::StudioResult,
    policy::{Policy, PolicyKind},
    sim::{AgentState, CompiledEnv, EpisodeState, MAX_SPEED, Vec2},
    spec::{Action, ActionSpace, CoordinateSystem, Direction},
};

/// Alignment threshold: axis deltas below this count as "already there".
const ALIGNED: f64 = 0.1;

/// Pathfinds toward the nearest goal object with obstacle avoidance.
///
/// Preferred axis is the larger of `|dx|, |dy|`; if the preferred landing
/// cell is out of bounds or collides, the perpendicular alternatives are
/// tried, then every remaining declared action. When all directions are
/// blocked the preferred action is emitted anyway and the kernel records the
/// no-op. Alternative probes refuse to re-enter the cell left on the
/// previous tick, which is what lets the policy walk around multi-cell
/// walls instead of shuttling in front of them.
#[derive(Debug)]
pub struct GreedyPolicy {
    rng: StdRng,
    /// Position each agent occupied before its last accepted probe.
    prev_positions: Vec<Vec2>,
}

impl GreedyPolicy {
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            prev_positions: Vec::new(),
        }
    }
}

impl Policy for GreedyPolicy {
    fn select(&mut self, state: &EpisodeState, env: &CompiledEnv) -> StudioResult<Action> {
        if self.prev_positions.len() != state.agents.len() {
            self.prev_positions = state.agents.iter().map(|a| a.position).collect();
        }

        let multi = state.agents.len() > 1;
        let action = if multi {
            let entries: Vec<_> = (0..state.agents.len())
                .map(|idx| {
                    let action = self.select_for_agent(idx, state, env, true);
                    (state.agents[idx].id.clone(), action)
                })
                .collect();
            Action::multi(entries)
        } else if state.agents.is_empty() {
            default_action(&env.spec().action_space)
        } else {
            self.select_for_agent(0, state, env, false)
        };

        for (slot, agent) in self.prev_positions.iter_mut().zip(&state.agents) {
            *slot = agent.position;
        }
        Ok(action)
    }

    fn kind(&self) -> PolicyKind {
        PolicyKind::Greedy
    }

    fn reset(&mut self) {
        self.prev_positions.clear();
    }
}

impl GreedyPolicy {
    fn select_for_agent(
        &mut self,
        idx: usize,
        state: &EpisodeState,
        env: &CompiledEnv,
        multi: bool,
    ) -> Action {
        match &env.spec().action_space {
            ActionSpace::Discrete { actions } => {
                self.select_discrete(idx, state, env, actions, multi)
            }
            ActionSpace::Continuous { .. } => continuous_toward_goal(&state.agents[idx], env),
        }
    }

    fn select_discrete(
        &mut self,
        idx: usize,
        state: &EpisodeState,
        env: &CompiledEnv,
        actions: &[String],
        multi: bool,
    ) -> Action {
        let agent = &state.agents[idx];
        let Some(goal) = nearest_goal(agent.position, env) else {
            let i = self.rng.random_range(0..actions.len());
            return Action::Discrete(actions[i].clone());
        };

        let world = &env.spec().world;
        let grid = world.coordinate_system == CoordinateSystem::Grid;
        let dx = goal.x - agent.position.x;
        // Grid `up` decreases y, so the vertical delta flips sign there.
        let dy = if grid {
            agent.position.y - goal.y
        } else {
            goal.y - agent.position.y
        };

        let preferred = if dx.abs() >= dy.abs() {
            if dx.abs() < ALIGNED {
                vertical(dy)
            } else {
                horizontal(dx)
            }
        } else if dy.abs() < ALIGNED {
            horizontal(dx)
        } else {
            vertical(dy)
        };

        let probe = Probe {
            state,
            env,
            agent_idx: idx,
            check_agents: multi,
            avoid: self.prev_positions.get(idx).copied(),
        };

        if probe.is_free(preferred, false) {
            return preferred.into();
        }

        // Perpendicular alternatives first, goalward one leading.
        let alternatives = if matches!(preferred, Direction::Up | Direction::Down) {
            let lead = horizontal(dx);
            [lead, lead.opposite()]
        } else {
            let lead = vertical(dy);
            [lead, lead.opposite()]
        };
        for alt in alternatives {
            if probe.is_free(alt, true) {
                return alt.into();
            }
        }

        // Any remaining declared action.
        for name in actions {
            if let Ok(dir) = name.parse::<Direction>()
                && probe.is_free(dir, true)
            {
                return Action::Discrete(name.clone());
            }
        }

        // Everything is blocked: emit the preferred action anyway and let
        // the kernel record the no-op.
        preferred.into()
    }
}

// ================================================================================================
// Candidate probing
// ================================================================================================

struct Probe<'a> {
    state: &'a EpisodeState,
    env: &'a CompiledEnv,
    agent_idx: usize,
    check_agents: bool,
    /// Cell left on the previous tick; alternatives refuse to re-enter it.
    avoid: Option<Vec2>,
}

impl Probe<'_> {
    fn is_free(&self, dir: Direction, is_alternative: bool) -> bool {
        let world = &self.env.spec().world;
        let grid = world.coordinate_system == CoordinateSystem::Grid;
        let current = self.state.agents[self.agent_idx].position;

        let (dx, dy) = if grid {
            dir.grid_delta(world.cell_size())
        } else {
            dir.continuous_delta(MAX_SPEED)
        };
        let raw = current.offset(dx, dy);

        if grid
            && (raw.x < 0.0 || raw.x >= world.width || raw.y < 0.0 || raw.y >= world.height)
        {
            return false;
        }
        let landing = if grid { world.clamp(raw) } else { raw };

        if grid
            && is_alternative
            && let Some(avoid) = self.avoid
            && landing.distance(avoid) < 0.5
        {
            return false;
        }

        for &i in self.env.blocking() {
            let obstacle = self.state.objects[i].position;
            let hit = if grid {
                (landing.x - obstacle.x).abs() < 0.5 && (landing.y - obstacle.y).abs() < 0.5
            } else {
                landing.distance(obstacle) < 1.0
            };
            if hit {
                return false;
            }
        }

        if self.check_agents {
            for (j, other) in self.state.agents.iter().enumerate() {
                if j != self.agent_idx && landing.distance(other.position) < 0.5 {
                    return false;
                }
            }
        }

        true
    }
}

// ================================================================================================
// Helpers
// ================================================================================================

impl Direction {
    fn opposite(&self) -> Direction {
        match self {
            Direction::Up => Direction::Down,
            Direction::Down => Direction::Up,
            Direction::Left => Direction::Right,
            Direction::Right => Direction::Left,
        }
    }
}

fn horizontal(dx: f64) -> Direction {
    if dx > 0.0 { Direction::Right } else { Direction::Left }
}

fn vertical(dy: f64) -> Direction {
    if dy > 0.0 { Direction::Up } else { Direction::Down }
}

fn nearest_goal(from: Vec2, env: &CompiledEnv) -> Option<Vec2> {
    env.object_positions(env.goals())
        .min_by(|a, b| from.distance(*a).total_cmp(&from.distance(*b)))
}

/// Unit vector toward the first goal object; zero once within 0.1 of it.
fn continuous_toward_goal(agent: &AgentState, env: &CompiledEnv) -> Action {
    let Some(&goal_idx) = env.goals().first() else {
        return Action::continuous(0.0, 0.0);
    };
    let goal = env.spec().objects[goal_idx].position;
    let delta = goal - agent.position;
    let dist = delta.norm();
    if dist < 0.1 {
        return Action::continuous(0.0, 0.0);
    }
    Action::continuous(delta.x / dist, delta.y / dist)
}

fn default_action(space: &ActionSpace) -> Action {
    match space {
        ActionSpace::Discrete { actions } => Action::Discrete(
            actions.first().cloned().unwrap_or_else(|| "up".to_string()),
        ),
        ActionSpace::Continuous { .. } => Action::continuous(0.0, 0.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::{
        AgentSpec, Condition, EnvSpec, ObjectKind, ObjectSpec, RewardRule, RuleId, RuleSet,
        TerminationRule, WorldSpec,
    };

    fn grid_env(agents: Vec<AgentSpec>, objects: Vec<ObjectSpec>) -> CompiledEnv {
        let spec = EnvSpec {
            name: None,
            world: WorldSpec::grid(5.0, 5.0),
            agents,
            objects,
            action_space: ActionSpace::compass(),
            rules: RuleSet {
                rewards: vec![RewardRule {
                    id: RuleId::from("r"),
                    condition: Condition::Step,
                    reward: -0.1,
                }],
                terminations: vec![TerminationRule {
                    id: RuleId::from("t"),
                    condition: Condition::Timeout { steps: None },
                }],
                events: Vec::new(),
            },
        };
        CompiledEnv::compile(&spec).unwrap()
    }

    #[test]
    fn walks_the_long_axis_first() {
        let env = grid_env(
            vec![AgentSpec::new("a", Vec2::new(0.0, 0.0))],
            vec![ObjectSpec::new("g", ObjectKind::Goal, Vec2::new(4.0, 2.0))],
        );
        let state = env.init();
        let mut policy = GreedyPolicy::seeded(0);
        assert_eq!(
            policy.select(&state, &env).unwrap(),
            Action::discrete("right")
        );
    }

    #[test]
    fn grid_vertical_moves_respect_the_flipped_axis() {
        // Goal below the agent in grid coords (larger y) means `down`.
        let env = grid_env(
            vec![AgentSpec::new("a", Vec2::new(2.0, 0.0))],
            vec![ObjectSpec::new("g", ObjectKind::Goal, Vec2::new(2.0, 4.0))],
        );
        let state = env.init();
        let mut policy = GreedyPolicy::seeded(0);
        assert_eq!(
            policy.select(&state, &env).unwrap(),
            Action::discrete("down")
        );
    }

    #[test]
    fn sidesteps_a_blocking_wall() {
        let env = grid_env(
            vec![AgentSpec::new("a", Vec2::new(1.0, 0.0))],
            vec![
                ObjectSpec::new("w1", ObjectKind::Wall, Vec2::new(2.0, 0.0)),
                ObjectSpec::new("g", ObjectKind::Goal, Vec2::new(4.0, 0.0)),
            ],
        );
        let state = env.init();
        let mut policy = GreedyPolicy::seeded(0);
        // Preferred `right` collides; the perpendicular probe wins.
        let action = policy.select(&state, &env).unwrap();
        assert_eq!(action, Action::discrete("down"));
    }

    #[test]
    fn detours_around_a_two_cell_wall() {
        let env = grid_env(
            vec![AgentSpec::new("a", Vec2::new(0.0, 0.0))],
            vec![
                ObjectSpec::new("w1", ObjectKind::Wall, Vec2::new(2.0, 0.0)),
                ObjectSpec::new("w2", ObjectKind::Wall, Vec2::new(2.0, 1.0)),
                ObjectSpec::new("g", ObjectKind::Goal, Vec2::new(4.0, 0.0)),
            ],
        );
        let mut policy = GreedyPolicy::seeded(0);
        let mut state = env.init();
        for _ in 0..12 {
            if state.done {
                break;
            }
            let action = policy.select(&state, &env).unwrap();
            state = env.step(&state, &action, 50);
        }
        assert!(state.done, "agent should reach the goal, not shuttle");
        assert!(state.step <= 10);
    }

    #[test]
    fn no_goals_falls_back_to_a_seeded_draw() {
        let env = grid_env(vec![AgentSpec::new("a", Vec2::new(0.0, 0.0))], Vec::new());
        let state = env.init();
        let a = GreedyPolicy::seeded(9).select(&state, &env).unwrap();
        let b = GreedyPolicy::seeded(9).select(&state, &env).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn continuous_greedy_returns_a_unit_vector() {
        let spec = EnvSpec {
            name: None,
            world: WorldSpec::continuous(10.0, 10.0),
            agents: vec![AgentSpec::new("a", Vec2::new(0.0, 0.0))],
            objects: vec![ObjectSpec::new("g", ObjectKind::Goal, Vec2::new(5.0, 0.0))],
            action_space: ActionSpace::planar(),
            rules: RuleSet {
                rewards: vec![RewardRule {
                    id: RuleId::from("r"),
                    condition: Condition::ReachGoal,
                    reward: 10.0,
                }],
                terminations: vec![TerminationRule {
                    id: RuleId::from("t"),
                    condition: Condition::Timeout { steps: None },
                }],
                events: Vec::new(),
            },
        };
        let env = CompiledEnv::compile(&spec).unwrap();
        let state = env.init();
        let mut policy = GreedyPolicy::seeded(0);
        match policy.select(&state, &env).unwrap() {
            Action::Continuous(v) => {
                assert!((v[0] - 1.0).abs() < 1e-12);
                assert_eq!(v[1], 0.0);
            }
            other => panic!("expected continuous action, got {other:?}"),
        }
    }

    #[test]
    fn continuous_greedy_stops_at_the_goal() {
        let spec = EnvSpec {
            name: None,
            world: WorldSpec::continuous(10.0, 10.0),
            agents: vec![AgentSpec::new("a", Vec2::new(5.0, 0.05))],
            objects: vec![ObjectSpec::new("g", ObjectKind::Goal, Vec2::new(5.0, 0.0))],
            action_space: ActionSpace::planar(),
            rules: RuleSet {
                rewards: vec![RewardRule {
                    id: RuleId::from("r"),
                    condition: Condition::ReachGoal,
                    reward: 10.0,
                }],
                terminations: vec![TerminationRule {
                    id: RuleId::from("t"),
                    condition: Condition::Timeout { steps: None },
                }],
                events: Vec::new(),
            },
        };
        let env = CompiledEnv::compile(&spec).unwrap();
        let state = env.init();
        let mut policy = GreedyPolicy::seeded(0);
        assert_eq!(
            policy.select(&state, &env).unwrap(),
            Action::continuous(0.0, 0.0)
        );
    }

    #[test]
    fn all_blocked_emits_the_preferred_action_anyway() {
        let env = grid_env(
            vec![AgentSpec::new("a", Vec2::new(0.0, 0.0))],
            vec![
                ObjectSpec::new("w1", ObjectKind::Wall, Vec2::new(1.0, 0.0)),
                ObjectSpec::new("w2", ObjectKind::Wall, Vec2::new(0.0, 1.0)),
                ObjectSpec::new("g", ObjectKind::Goal, Vec2::new(4.0, 0.0)),
            ],
        );
        let state = env.init();
        let mut policy = GreedyPolicy::seeded(0);
        // Right and down are walls, up and left leave the world.
        assert_eq!(
            policy.select(&state, &env).unwrap(),
            Action::discrete("right")
        );
    }
}
