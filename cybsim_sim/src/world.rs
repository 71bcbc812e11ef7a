//! SimWorld - The tick scheduler.
//!
//! Owns the network, the organizations, the trust network and the single
//! `SimContext`. Each tick runs decide against committed state, then commits
//! every deferred mutation in a fixed order so a seed replays exactly.

use crate::config::SimConfig;
use crate::error::ConfigError;
use crate::snapshot::{
    AttackerSnapshot, EdgeSnapshot, OrganizationReport, OrganizationSnapshot, WorldSnapshot,
};

use cybsim_core::agent::{normalize, sample_contacts, sample_targets};
use cybsim_core::sharing::matrix_rows;
use cybsim_core::{
    decide, Action, AttackerId, Correspondence, CorrespondenceId, DetectionInput, DetectionMode,
    DropReason, Intention, Message, Network, NetworkBuilder, NodeId, OrgId, Organization,
    OrganizationLayout, Outcome, Payload, PopulationFactory, Role, RouteOutcome, SharingPhase,
    StepAction, StepCode, Threat, TrustNetwork, WorldView,
};
use cybsim_env::{SimContext, Tick};
use rand::Rng;
use rand_distr::{Distribution, Exp};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use tracing::{debug, info, warn};

/// Running counters for one world.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorldMetrics {
    /// Messages handed to the router for the first time
    pub messages_sent: u64,

    pub delivered: u64,

    pub dropped_capacity: u64,

    pub dropped_unroutable: u64,

    /// Times a message was parked for lack of hop budget
    pub held: u64,

    pub correspondences_opened: u64,

    pub correspondences_succeeded: u64,

    pub correspondences_failed: u64,

    /// Failed packets across all correspondences
    pub packet_failures: u64,

    pub compromises: u64,

    /// Compromise attempts stopped by a detection trial
    pub blocked_attacks: u64,

    pub detections: u64,

    pub cleanings: u64,

    pub incidents_handled: u64,

    pub incidents_unhandled: u64,

    pub attackers_activated: u64,

    pub sharing_interactions: u64,

    pub cooperations: u64,

    pub defections: u64,

    pub one_sided: u64,

    pub information_moved: f64,

    pub peak_compromised: usize,
}

impl WorldMetrics {
    pub fn dropped(&self) -> u64 {
        self.dropped_capacity + self.dropped_unroutable
    }
}

/// The simulation world.
pub struct SimWorld {
    config: SimConfig,

    ctx: SimContext,

    network: Network,

    organizations: Vec<Organization>,

    trust: TrustNetwork,

    /// Active threats by attacker
    threats: BTreeMap<AttackerId, Threat>,

    /// Device each active attacker sits on
    attacker_nodes: BTreeMap<AttackerId, NodeId>,

    /// Activation ticks of attackers not yet in the pool
    schedule: VecDeque<Tick>,

    factory: PopulationFactory,

    correspondences: BTreeMap<CorrespondenceId, Correspondence>,

    next_correspondence: u64,

    next_message: u64,

    /// Devices newly compromised this tick, per organization
    newly_compromised: Vec<usize>,

    metrics: WorldMetrics,
}

impl SimWorld {
    /// Validates `config` and builds the world at tick 0.
    pub fn new(config: SimConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let mut ctx = SimContext::new(config.seed);

        let topo = &config.topology;
        let budgets: Vec<f64> = (0..topo.organizations)
            .map(|_| ctx.rng().gen_range(config.budget.budget_min..=config.budget.budget_max))
            .collect();
        let layouts: Vec<OrganizationLayout> = (0..topo.organizations)
            .map(|_| sample_layout(&config, ctx.rng()))
            .collect();

        let mut factory = PopulationFactory::new(budgets.clone())
            .with_deviation_width(config.employees.deviation_width)
            .with_activity(config.employees.max_activity, config.attackers.max_activity);

        let network = NetworkBuilder::new()
            .with_organizations(layouts)
            .with_attacker_slots(config.attackers.initial)
            .with_degrees(topo.backbone_degree, topo.organization_degree)
            .with_device_capacity(topo.device_capacity)
            .build(ctx.rng(), &mut factory);

        let num_orgs = network.organization_nodes().len();
        let organizations: Vec<Organization> = network
            .organization_nodes()
            .iter()
            .enumerate()
            .map(|(i, &node)| {
                let budget = budgets.get(i).copied().unwrap_or(config.budget.budget_min);
                Organization::new(OrgId(i), node, budget, network.leaf_devices(node).len(), num_orgs)
            })
            .collect();

        let trust = TrustNetwork::new(
            num_orgs,
            config.sharing.initial_closeness,
            config.sharing.initial_trust,
        );

        let mut world = Self {
            ctx,
            network,
            organizations,
            trust,
            threats: BTreeMap::new(),
            attacker_nodes: BTreeMap::new(),
            schedule: VecDeque::new(),
            factory,
            correspondences: BTreeMap::new(),
            next_correspondence: 0,
            next_message: 0,
            newly_compromised: vec![0; num_orgs],
            metrics: WorldMetrics::default(),
            config,
        };

        world.build_contacts();

        let mut initial: Vec<(AttackerId, NodeId)> = world
            .network
            .agents()
            .into_iter()
            .filter_map(|node| {
                world
                    .network
                    .role(node)
                    .and_then(Role::attacker)
                    .map(|a| (a.id, node))
            })
            .collect();
        initial.sort();
        for (id, node) in initial {
            world.register_attacker(id, node, 0);
        }

        world.build_schedule();

        info!(
            seed = world.config.seed,
            organizations = num_orgs,
            nodes = world.network.len(),
            employees = world.network.employees().len(),
            attackers = world.threats.len(),
            "World built"
        );

        Ok(world)
    }

    // ------------------------------------------------------------------
    // Initialization
    // ------------------------------------------------------------------

    /// Gives every employee colleagues from its organization and a few outside contacts.
    fn build_contacts(&mut self) {
        let employees = self.network.employees();
        let by_org: Vec<(NodeId, Option<OrgId>)> = employees
            .iter()
            .map(|&id| (id, self.network.org_of(id)))
            .collect();

        let cfg = &self.config.employees;
        for &(id, org) in &by_org {
            let colleagues: Vec<NodeId> = by_org
                .iter()
                .filter(|&&(other, o)| other != id && o == org)
                .map(|&(other, _)| other)
                .collect();
            let outsiders: Vec<NodeId> = by_org
                .iter()
                .filter(|&&(_, o)| o != org)
                .map(|&(other, _)| other)
                .collect();

            let rng = self.ctx.rng();
            let inside = rng.gen_range(cfg.colleagues_min..=cfg.colleagues_max);
            let outside = rng.gen_range(0..=cfg.outside_contacts_max);
            let mut contacts = sample_contacts(&colleagues, inside, rng);
            contacts.extend(sample_contacts(&outsiders, outside, rng));
            normalize(&mut contacts);

            if let Some(employee) = self.network.role_mut(id).and_then(Role::employee_mut) {
                employee.contacts = contacts;
            }
        }
    }

    /// Precomputes activation ticks for the attackers beyond the initial ones.
    fn build_schedule(&mut self) {
        let cfg = &self.config.attackers;
        let remaining = cfg.total.saturating_sub(cfg.initial);
        let exp = if cfg.mean_activation_gap > 0.0 {
            Exp::new(1.0 / cfg.mean_activation_gap).ok()
        } else {
            None
        };

        let mut at = 0.0_f64;
        let mut last: Tick = 0;
        for _ in 0..remaining {
            let gap = match &exp {
                Some(exp) => exp.sample(self.ctx.rng()),
                None => 0.0,
            };
            at += gap;
            let tick = (at.ceil() as Tick).max(last).max(1);
            self.schedule.push_back(tick);
            last = tick;
        }
    }

    /// Threat identity, registration with every organization and a target table.
    fn register_attacker(&mut self, id: AttackerId, node: NodeId, tick: Tick) {
        let cfg = &self.config.attackers;
        let threat = Threat::sample(
            id,
            cfg.indicator_bits,
            cfg.fixed_effectiveness,
            tick,
            self.ctx.rng(),
        );
        for org in &mut self.organizations {
            org.register_threat(&threat);
        }

        let candidates: Vec<(NodeId, f64)> = self
            .network
            .employees()
            .into_iter()
            .filter_map(|e| {
                self.network
                    .role(e)
                    .and_then(Role::employee)
                    .map(|emp| (e, emp.media_presence))
            })
            .collect();
        let rng = self.ctx.rng();
        let count = rng.gen_range(cfg.targets_min..=cfg.targets_max);
        let targets = sample_targets(&candidates, count, rng);
        if let Some(attacker) = self.network.role_mut(node).and_then(Role::attacker_mut) {
            attacker.targets = targets;
        }

        debug!(attacker = %id, effectiveness = threat.effectiveness, "Threat registered");
        self.threats.insert(id, threat);
        self.attacker_nodes.insert(id, node);
    }

    // ------------------------------------------------------------------
    // Tick
    // ------------------------------------------------------------------

    /// Runs one tick and returns its number.
    pub fn step(&mut self) -> Tick {
        let tick = self.ctx.advance_tick();
        self.network.reset_tick();

        self.activate_due_attackers(tick);

        if self.config.sharing.enabled && self.config.sharing.phase == SharingPhase::Before {
            self.sharing_round();
        }

        let actions = self.decide_all(tick);
        self.commit(actions, tick);

        if self.config.sharing.enabled && self.config.sharing.phase == SharingPhase::After {
            self.sharing_round();
        }

        self.record_tick();
        tick
    }

    /// Runs `ticks` more ticks.
    pub fn run(&mut self, ticks: u64) {
        for _ in 0..ticks {
            self.step();
        }
    }

    /// Runs until the configured tick count.
    pub fn run_to_end(&mut self) {
        while self.tick() < self.config.ticks {
            self.step();
        }
    }

    fn activate_due_attackers(&mut self, tick: Tick) {
        while self.schedule.front().is_some_and(|&due| due <= tick) {
            self.schedule.pop_front();
            let attacker = self.factory.make_attacker(self.ctx.rng());
            let id = attacker.id;
            let pool = self.network.attacker_pool();
            match self.network.attach_device(pool, Role::Attacker(attacker)) {
                Ok(node) => {
                    self.register_attacker(id, node, tick);
                    self.metrics.attackers_activated += 1;
                    info!(attacker = %id, tick, address = ?self.network.address(node), "Attacker activated");
                }
                Err(e) => warn!(attacker = %id, error = %e, "Attacker could not be attached"),
            }
        }
    }

    fn sharing_round(&mut self) {
        let report = cybsim_core::play_round(
            &mut self.trust,
            &mut self.organizations,
            &self.config.sharing,
            self.ctx.rng(),
        );
        self.metrics.sharing_interactions += report.interactions as u64;
        self.metrics.cooperations += report.cooperations as u64;
        self.metrics.defections += report.defections as u64;
        self.metrics.one_sided += report.one_sided as u64;
        self.metrics.information_moved += report.information_moved;
    }

    /// Read-only pass: every agent picks an action.
    fn decide_all(&mut self, tick: Tick) -> Vec<Action> {
        let agents = self.network.agents();
        let view = WorldView {
            network: &self.network,
            tick,
        };
        let rng = self.ctx.rng();
        agents
            .into_iter()
            .filter_map(|id| view.network.role(id).map(|role| decide(id, role, &view, rng)))
            .collect()
    }

    fn commit(&mut self, actions: Vec<Action>, tick: Tick) {
        for outcome in self.network.retry_pending() {
            self.handle_outcome(outcome, tick);
        }

        for action in actions {
            if let Action::Correspond { from, to, intention } = action {
                self.open_correspondence(from, to, intention);
            }
        }

        let ids: Vec<CorrespondenceId> = self.correspondences.keys().copied().collect();
        for id in ids {
            self.step_correspondence(id, tick);
        }
        self.correspondences.retain(|_, c| c.is_active());

        self.passive_detection(tick);
        self.expire_incidents(tick);

        let interval = self.config.budget.update_interval;
        if interval > 0 && tick % interval == 0 {
            for org in &mut self.organizations {
                let before = org.security_budget;
                let after = org.adapt_budget(&self.config.budget);
                debug!(org = %org.id, before, after, "Budget adapted");
            }
        }
    }

    fn record_tick(&mut self) {
        for (org, newly) in self.organizations.iter_mut().zip(self.newly_compromised.iter_mut()) {
            org.record_tick(*newly);
            *newly = 0;
        }
        let total = self.total_compromised();
        self.metrics.peak_compromised = self.metrics.peak_compromised.max(total);
    }

    // ------------------------------------------------------------------
    // Correspondences
    // ------------------------------------------------------------------

    fn open_correspondence(&mut self, from: NodeId, to: NodeId, intention: Intention) {
        if from == to {
            return;
        }
        let id = CorrespondenceId(self.next_correspondence);
        self.next_correspondence += 1;
        let correspondence = Correspondence::initiate(
            id,
            from,
            to,
            intention,
            self.config.correspondence.fails_to_end,
            self.ctx.rng(),
        );
        self.metrics.correspondences_opened += 1;
        if self.ctx.verbose() {
            debug!(correspondence = %id, %from, %to, ?intention, steps = correspondence.len(), "Correspondence opened");
        }
        self.correspondences.insert(id, correspondence);
    }

    fn step_correspondence(&mut self, id: CorrespondenceId, tick: Tick) {
        let action = match self.correspondences.get_mut(&id) {
            Some(c) => c.begin_step(),
            None => return,
        };
        match action {
            StepAction::Wait | StepAction::Advanced(None) => {}
            StepAction::Advanced(Some(outcome)) => self.complete(id, outcome, tick),
            StepAction::Send(direction) => self.send_step(id, direction, tick),
        }
    }

    fn attacker_at(&self, node: NodeId) -> Option<AttackerId> {
        self.network.role(node).and_then(Role::attacker).map(|a| a.id)
    }

    fn user_security(&self, node: NodeId) -> f64 {
        self.network
            .role(node)
            .and_then(Role::employee)
            .map_or(1.0, |e| e.user_security)
    }

    /// Routes the message for one scripted step.
    fn send_step(&mut self, id: CorrespondenceId, direction: StepCode, tick: Tick) {
        let Some((a, b, intention)) = self
            .correspondences
            .get(&id)
            .map(|c| (c.party_a, c.party_b, c.intention))
        else {
            return;
        };
        let (from, to) = match direction {
            StepCode::BtoA => (b, a),
            _ => (a, b),
        };

        let payload = match (intention, direction, self.attacker_at(a)) {
            (Intention::Work, _, _) | (_, _, None) => Payload::Plain,
            (Intention::Phishing, StepCode::AtoB, Some(attacker)) => Payload::Lure {
                attacker,
                effectiveness: self.threats.get(&attacker).map_or(0.0, |t| t.effectiveness),
            },
            (Intention::Escalate, StepCode::AtoB, Some(attacker)) => Payload::Control { attacker },
            (_, _, Some(attacker)) => Payload::Credentials { attacker },
        };

        if let Payload::Lure { effectiveness, .. } = payload {
            if effectiveness > self.user_security(b) {
                if let Some(c) = self.correspondences.get_mut(&id) {
                    c.insert_response(self.ctx.rng());
                }
            }
        }

        let (Some(source), Some(destination)) = (
            self.network.address(from).cloned(),
            self.network.address(to).cloned(),
        ) else {
            self.packet_failed(id, tick);
            return;
        };

        let message = Message::new(self.next_message, source, destination, payload, tick)
            .with_correspondence(id)
            .with_max_hops(self.config.topology.max_hops);
        self.next_message += 1;
        self.metrics.messages_sent += 1;

        let outcome = self.network.route(from, message);
        self.handle_outcome(outcome, tick);
    }

    fn handle_outcome(&mut self, outcome: RouteOutcome, tick: Tick) {
        match outcome {
            RouteOutcome::Delivered { at, message } => {
                self.metrics.delivered += 1;
                if self.ctx.verbose() {
                    debug!(message = message.id, %at, hops = message.total_hops, "Delivered");
                }
                self.execute_payload(at, &message, tick);
                if let Some(id) = message.correspondence {
                    let done = self.correspondences.get_mut(&id).and_then(|c| c.packet_success());
                    if let Some(outcome) = done {
                        self.complete(id, outcome, tick);
                    }
                }
            }
            RouteOutcome::Held { at, message_id } => {
                self.metrics.held += 1;
                if self.ctx.verbose() {
                    debug!(message = message_id, %at, "Held for lack of hop budget");
                }
            }
            RouteOutcome::Dropped { at, message, reason } => {
                match &reason {
                    DropReason::Capacity { .. } => self.metrics.dropped_capacity += 1,
                    DropReason::Unroutable(e) => {
                        self.metrics.dropped_unroutable += 1;
                        debug!(message = message.id, %at, error = %e, "Dropped");
                    }
                }
                if let Some(id) = message.correspondence {
                    self.packet_failed(id, tick);
                }
            }
        }
    }

    fn packet_failed(&mut self, id: CorrespondenceId, tick: Tick) {
        let Some(c) = self.correspondences.get_mut(&id) else {
            return;
        };
        let was_active = c.is_active();
        let done = c.packet_failed();
        if was_active {
            self.metrics.packet_failures += 1;
        }
        if let Some(outcome) = done {
            self.complete(id, outcome, tick);
        }
    }

    /// Credentials arriving at their attacker attempt a targeted compromise of the sender.
    fn execute_payload(&mut self, at: NodeId, message: &Message, tick: Tick) {
        let Payload::Credentials { attacker } = message.payload else {
            return;
        };
        if self.attacker_nodes.get(&attacker) != Some(&at) {
            return;
        }
        if let Some(victim) = self.network.resolve_device(&message.source) {
            self.attempt_compromise(victim, attacker, DetectionMode::Target, None, tick);
        }
    }

    /// Completion effects of a finished correspondence.
    fn complete(&mut self, id: CorrespondenceId, outcome: Outcome, tick: Tick) {
        let Some(c) = self.correspondences.get(&id) else {
            return;
        };
        let (a, b, intention) = (c.party_a, c.party_b, c.intention);
        let (credit_a, credit_b) = c.work_credit();
        let value = c.work_value();

        if outcome == Outcome::Failed {
            self.metrics.correspondences_failed += 1;
            return;
        }
        self.metrics.correspondences_succeeded += 1;

        match intention {
            Intention::Work => {
                for (party, credited) in [(a, credit_a), (b, credit_b)] {
                    if !credited {
                        continue;
                    }
                    if let Some(employee) = self.network.role_mut(party).and_then(Role::employee_mut) {
                        employee.add_work(value);
                    }
                }
            }
            // Capturing the victim already switched the attacker to Escalate
            Intention::Phishing => {}
            Intention::Escalate => {
                if let Some(attacker) = self.attacker_at(a) {
                    self.spread_from(b, attacker, tick);
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Infection & detection
    // ------------------------------------------------------------------

    /// Lateral movement from a controlled device to another employee of its organization.
    fn spread_from(&mut self, source: NodeId, attacker: AttackerId, tick: Tick) {
        let Some(org) = self.network.org_of(source) else {
            return;
        };
        let Some(organization) = self.organizations.get(org.0) else {
            return;
        };
        if !organization.is_compromised_by(source, attacker) {
            return;
        }

        let candidates: Vec<NodeId> = self
            .network
            .leaf_devices(organization.node)
            .into_iter()
            .filter(|&d| {
                d != source
                    && !organization.is_compromised_by(d, attacker)
                    && self.network.role(d).and_then(Role::employee).is_some()
            })
            .collect();
        if candidates.is_empty() {
            return;
        }
        let target = candidates[self.ctx.rng().gen_range(0..candidates.len())];
        self.attempt_compromise(target, attacker, DetectionMode::Spread, Some(source), tick);
    }

    /// Runs the detection trial for an attack on `victim`; infects it when the trial fails.
    ///
    /// A blocked spread also cleans the device it came from.
    fn attempt_compromise(
        &mut self,
        victim: NodeId,
        attacker: AttackerId,
        mode: DetectionMode,
        source: Option<NodeId>,
        tick: Tick,
    ) {
        let Some(org) = self.network.org_of(victim) else {
            return;
        };
        let Some(input) = self.detection_input(org, attacker, mode) else {
            return;
        };
        if self
            .organizations
            .get(org.0)
            .map_or(true, |o| o.is_compromised_by(victim, attacker))
        {
            return;
        }

        if self.config.detection.trial(&input, self.ctx.rng()) {
            self.metrics.blocked_attacks += 1;
            self.on_detection(org, attacker, source, tick);
        } else {
            self.infect(victim, org, attacker, tick);
        }
    }

    fn detection_input(&self, org: OrgId, attacker: AttackerId, mode: DetectionMode) -> Option<DetectionInput> {
        let organization = self.organizations.get(org.0)?;
        let threat = self.threats.get(&attacker)?;
        Some(DetectionInput {
            security_budget: organization.security_budget,
            information: organization.information(attacker),
            effectiveness: threat.effectiveness,
            mode,
            aware: organization.is_aware(attacker),
        })
    }

    fn on_detection(&mut self, org: OrgId, attacker: AttackerId, device: Option<NodeId>, tick: Tick) {
        let Some(threat) = self.threats.get(&attacker) else {
            return;
        };
        let Some(organization) = self.organizations.get_mut(org.0) else {
            return;
        };
        let revealed = organization.record_detection(threat, tick);
        self.metrics.detections += 1;
        debug!(%org, attacker = %attacker, ?revealed, tick, "Detection");

        if let Some(device) = device {
            self.disinfect(device, org, attacker, tick);
        }
    }

    fn infect(&mut self, victim: NodeId, org: OrgId, attacker: AttackerId, tick: Tick) {
        let Some(organization) = self.organizations.get_mut(org.0) else {
            return;
        };
        if !organization.compromise(victim, attacker, tick) {
            return;
        }
        self.metrics.compromises += 1;
        if let Some(newly) = self.newly_compromised.get_mut(org.0) {
            *newly += 1;
        }
        if let Some(&node) = self.attacker_nodes.get(&attacker) {
            if let Some(a) = self.network.role_mut(node).and_then(Role::attacker_mut) {
                a.capture(victim);
            }
        }
        debug!(%victim, %org, attacker = %attacker, tick, "Device compromised");
    }

    fn disinfect(&mut self, device: NodeId, org: OrgId, attacker: AttackerId, tick: Tick) {
        let Some(organization) = self.organizations.get_mut(org.0) else {
            return;
        };
        if !organization.is_compromised_by(device, attacker) {
            return;
        }
        let closure = organization.clean(device, attacker, tick);
        self.metrics.cleanings += 1;
        if closure.is_some() {
            self.metrics.incidents_handled += 1;
        }
        if let Some(&node) = self.attacker_nodes.get(&attacker) {
            if let Some(a) = self.network.role_mut(node).and_then(Role::attacker_mut) {
                a.release(device);
            }
        }
        debug!(%device, %org, attacker = %attacker, ?closure, "Device cleaned");
    }

    /// One passive trial per compromised (device, attacker) pair.
    fn passive_detection(&mut self, tick: Tick) {
        for index in 0..self.organizations.len() {
            let org = OrgId(index);
            let pairs = self
                .organizations
                .get(index)
                .map(Organization::compromised_pairs)
                .unwrap_or_default();
            for (device, attacker) in pairs {
                let Some(input) = self.detection_input(org, attacker, DetectionMode::Passive) else {
                    continue;
                };
                if self.config.detection.trial(&input, self.ctx.rng()) {
                    self.on_detection(org, attacker, Some(device), tick);
                }
            }
        }
    }

    fn expire_incidents(&mut self, tick: Tick) {
        let memory = self.config.budget.organization_memory;
        for org in &mut self.organizations {
            for (attacker, closure) in org.expire_incidents(tick, memory) {
                self.metrics.incidents_unhandled += 1;
                debug!(org = %org.id, attacker = %attacker, ?closure, "Incident expired");
            }
        }
    }

    // ------------------------------------------------------------------
    // Observation
    // ------------------------------------------------------------------

    pub fn tick(&self) -> Tick {
        self.ctx.tick()
    }

    pub fn seed(&self) -> u64 {
        self.ctx.seed()
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn network(&self) -> &Network {
        &self.network
    }

    pub fn organizations(&self) -> &[Organization] {
        &self.organizations
    }

    pub fn trust(&self) -> &TrustNetwork {
        &self.trust
    }

    pub fn threats(&self) -> &BTreeMap<AttackerId, Threat> {
        &self.threats
    }

    pub fn attacker_node(&self, attacker: AttackerId) -> Option<NodeId> {
        self.attacker_nodes.get(&attacker).copied()
    }

    pub fn metrics(&self) -> &WorldMetrics {
        &self.metrics
    }

    /// Open correspondences.
    pub fn correspondences(&self) -> impl Iterator<Item = &Correspondence> {
        self.correspondences.values()
    }

    /// Activation ticks still waiting.
    pub fn pending_activations(&self) -> &VecDeque<Tick> {
        &self.schedule
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.ctx = self.ctx.with_verbose(verbose);
        self
    }

    pub fn total_compromised(&self) -> usize {
        self.organizations.iter().map(Organization::compromised_devices).sum()
    }

    pub fn snapshot(&self) -> WorldSnapshot {
        let address = |id: NodeId| self.network.address(id).cloned().unwrap_or_default();

        let edges = self
            .network
            .edges()
            .iter()
            .map(|e| EdgeSnapshot {
                from: address(e.a),
                to: address(e.b),
                active: e.active,
                malicious: e.malicious,
            })
            .collect();

        let organizations = self
            .organizations
            .iter()
            .map(|o| OrganizationSnapshot {
                id: o.id.0,
                security_budget: o.security_budget,
                freeloading_ratio: o.freeloading_ratio(),
                avg_incident_duration: o.avg_incident_duration(),
                percent_compromised: o.percent_compromised(),
                compromised_devices: o.compromised_devices(),
                aware_of: o.aware_of(),
            })
            .collect();

        let attackers = self
            .threats
            .values()
            .map(|t| {
                let node = self.attacker_nodes.get(&t.id).copied();
                AttackerSnapshot {
                    id: t.id.0,
                    address: node.map(address).unwrap_or_default(),
                    effectiveness: t.effectiveness,
                    activated_at: t.activated_at,
                    captured: node
                        .and_then(|n| self.network.role(n))
                        .and_then(Role::attacker)
                        .map_or(0, |a| a.captured.len()),
                }
            })
            .collect();

        WorldSnapshot {
            tick: self.tick(),
            total_compromised: self.total_compromised(),
            edges,
            organizations,
            attackers,
            closeness: matrix_rows(self.trust.closeness_matrix()),
            trust: matrix_rows(self.trust.trust_matrix()),
        }
    }

    pub fn reports(&self) -> Vec<OrganizationReport> {
        self.organizations
            .iter()
            .map(|o| OrganizationReport {
                id: o.id.0,
                avg_incident_time: o.avg_incident_duration(),
                free_loading_ratio: o.freeloading_ratio(),
                avg_security: o.avg_security(),
                avg_compromised_per_step: o.avg_compromised_per_step(),
            })
            .collect()
    }
}

/// Device counts for one organization.
fn sample_layout<R: Rng + ?Sized>(config: &SimConfig, rng: &mut R) -> OrganizationLayout {
    let topo = &config.topology;
    match &topo.departments {
        None => OrganizationLayout::Flat {
            devices: rng.gen_range(topo.devices_min..=topo.devices_max),
        },
        Some(departments) => {
            let count = rng.gen_range(departments.count_min..=departments.count_max);
            OrganizationLayout::Departments {
                sizes: (0..count)
                    .map(|_| rng.gen_range(topo.devices_min..=topo.devices_max))
                    .collect(),
            }
        }
    }
}
