use crate::{
    sim::{
        CompiledEnv, EpisodeState, Vec2,
        conditions::{self, EvalCtx},
        state::{RewardRecord, TerminationReason},
    },
    spec::{Action, CoordinateSystem, Direction},
};

/// Displacement per tick along a continuous action vector.
pub const MAX_SPEED: f64 = 0.1;

/// Distance under which two agents collide (multi-agent only).
pub const AGENT_RADIUS: f64 = 0.5;

impl CompiledEnv {
    /// Fresh episode positioned from the spec: step 0, zero reward, the
    /// opening event recorded.
    pub fn init(&self) -> EpisodeState {
        EpisodeState::initial(self.spec())
    }

    /// Advances one tick: apply the action, evaluate event and reward rules
    /// against the post-move state, check termination, then truncate at
    /// `max_steps`.
    ///
    /// Pure and deterministic given `(state, action, spec)` — no I/O, no
    /// clocks. Never fails: malformed actions degrade to a recorded no-op,
    /// and stepping a finished episode returns the state unchanged. The step
    /// counter increments whether or not the move was accepted.
    pub fn step(&self, state: &EpisodeState, action: &Action, max_steps: u32) -> EpisodeState {
        if state.done {
            return state.clone();
        }

        let mut next = state.clone();
        next.step += 1;
        next.info.rewards.clear();

        // === Apply action ===
        match action {
            Action::Multi(map) => {
                // Spec declaration order, which is also arena order.
                for idx in 0..next.agents.len() {
                    let id = next.agents[idx].id.clone();
                    if let Some(sub) = map.get(&id) {
                        self.apply_to_agent(&mut next, idx, sub, true);
                    }
                }
            }
            single => {
                if !next.agents.is_empty() {
                    self.apply_to_agent(&mut next, 0, single, false);
                }
            }
        }

        // === User events ===
        let fired: Vec<String> = self
            .spec()
            .rules
            .events
            .iter()
            .filter(|rule| conditions::evaluate(&rule.condition, &next, self, &EvalCtx::default()))
            .map(|rule| rule.name.clone())
            .collect();
        for name in &fired {
            next.info.events.push(format!("Event: {name}"));
        }
        let ctx = EvalCtx {
            fired_events: &fired,
        };

        // === Rewards, in rule order ===
        for rule in &self.spec().rules.rewards {
            if conditions::evaluate(&rule.condition, &next, self, &ctx) {
                next.info.rewards.push(RewardRecord {
                    rule_id: rule.id.clone(),
                    value: rule.reward,
                    reason: rule.condition.kind(),
                });
                next.total_reward += rule.reward;
            }
        }

        // === Termination: first truthy rule wins ===
        for rule in &self.spec().rules.terminations {
            if rule.condition.is_timeout() {
                continue;
            }
            if conditions::evaluate(&rule.condition, &next, self, &ctx) {
                let reason = TerminationReason::Rule(rule.condition.kind());
                next.info.events.push(format!("Terminated: {reason}"));
                next.info.termination_reason = Some(reason);
                next.done = true;
                break;
            }
        }
        if !next.done && conditions::any_agent_at_goal(&next, self) {
            next.info.events.push("Terminated: goal_reached".to_string());
            next.info.termination_reason = Some(TerminationReason::GoalReached);
            next.done = true;
        }

        // === Truncation ===
        if next.step >= max_steps {
            if !next.done {
                next.info.termination_reason = Some(TerminationReason::MaxSteps);
                next.done = true;
            }
            next.info.events.push(format!("Max steps ({max_steps}) reached"));
        }

        next
    }

    fn apply_to_agent(&self, state: &mut EpisodeState, idx: usize, action: &Action, multi: bool) {
        let world = &self.spec().world;
        let current = state.agents[idx].position;

        match action {
            Action::Discrete(name) => {
                let candidate_raw = match name.parse::<Direction>() {
                    Ok(dir) => {
                        let (dx, dy) = if world.coordinate_system == CoordinateSystem::Grid {
                            dir.grid_delta(world.cell_size())
                        } else {
                            dir.continuous_delta(MAX_SPEED)
                        };
                        current.offset(dx, dy)
                    }
                    // Unknown action names stay put and flow through the
                    // same collision/record path.
                    Err(_) => current,
                };
                let candidate = world.clamp(candidate_raw);
                self.resolve_move(state, idx, candidate, Some(name), multi);
            }
            Action::Continuous(values) => {
                let (Some(&dx), Some(&dy)) = (values.first(), values.get(1)) else {
                    state.info.events.push("Malformed action ignored".to_string());
                    return;
                };
                if !dx.is_finite() || !dy.is_finite() {
                    state.info.events.push("Malformed action ignored".to_string());
                    return;
                }
                let candidate =
                    world.clamp_loose(current.offset(dx * MAX_SPEED, dy * MAX_SPEED));
                self.resolve_move(state, idx, candidate, None, multi);
            }
            Action::Multi(_) => {
                // Nested maps are not a valid per-agent action.
                state.info.events.push("Malformed action ignored".to_string());
            }
        }
    }

    /// Commits or rejects a candidate position and records the event.
    fn resolve_move(
        &self,
        state: &mut EpisodeState,
        idx: usize,
        candidate: Vec2,
        action_name: Option<&str>,
        multi: bool,
    ) {
        let current = state.agents[idx].position;
        let blocked = conditions::near_blocking(candidate, state, self)
            || (multi && self.other_agent_within(state, idx, candidate));

        let id = state.agents[idx].id.clone();
        if blocked {
            state.info.events.push(if multi {
                format!("Agent {id} hit obstacle, stayed at {current}")
            } else {
                format!("Hit obstacle, stayed at {current}")
            });
            return;
        }

        state.agents[idx].position = candidate;
        state.info.events.push(match (multi, action_name) {
            (true, Some(name)) => format!("Agent {id} moved {name} to {candidate}"),
            (true, None) => format!("Agent {id} moved to {candidate}"),
            (false, Some(name)) => format!("Moved {name} to {candidate}"),
            (false, None) => format!("Moved to {candidate}"),
        });
    }

    fn other_agent_within(&self, state: &EpisodeState, idx: usize, candidate: Vec2) -> bool {
        state
            .agents
            .iter()
            .enumerate()
            .any(|(j, other)| j != idx && candidate.distance(other.position) < AGENT_RADIUS)
    }
}
