//! Agent roles and the read-only decide step.
//!
//! Every leaf device carries a `Role`. Employees produce work traffic,
//! attackers phish and escalate. `decide` only reads the committed world and
//! returns an `Action`; the scheduler applies it during commit.

use crate::correspondence::Intention;
use crate::ids::{AttackerId, NodeId, OrgId};
use crate::network::{DeviceSlot, Network, RoleFactory, SlotKind};
use cybsim_env::Tick;
use rand::distributions::WeightedIndex;
use rand::prelude::Distribution;
use rand::{Rng, RngCore};
use rand_distr::Normal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

// ============================================================================
// EMPLOYEES
// ============================================================================

/// Kind of account an employee holds; sets the personal security range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccountType {
    FrontOffice,
    BackOffice,
    SecurityTeam,
    Developer,
}

impl AccountType {
    pub fn sample<R: Rng + ?Sized>(rng: &mut R) -> Self {
        match rng.gen_range(0..4) {
            0 => AccountType::FrontOffice,
            1 => AccountType::BackOffice,
            2 => AccountType::SecurityTeam,
            _ => AccountType::Developer,
        }
    }

    /// Half-open range personal security is drawn from.
    pub fn security_range(self) -> (f64, f64) {
        match self {
            AccountType::FrontOffice => (0.0, 0.3),
            AccountType::BackOffice => (0.3, 0.5),
            AccountType::SecurityTeam => (0.8, 1.0),
            AccountType::Developer => (0.5, 0.8),
        }
    }

    pub fn personal_security<R: Rng + ?Sized>(self, rng: &mut R) -> f64 {
        let (low, high) = self.security_range();
        rng.gen_range(low..high)
    }
}

/// Weighted entry in a communications or target table.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    pub device: NodeId,

    /// Normalized selection weight
    pub weight: f64,
}

/// Defender-side user of a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Employee {
    pub org: OrgId,

    pub account_type: AccountType,

    /// `0.3 * company + 0.7 * personal`
    pub user_security: f64,

    /// Chance of starting a correspondence each tick
    pub activity: f64,

    /// How visible the employee is to attackers choosing targets
    pub media_presence: f64,

    /// Accumulated work in `[0, 1]`
    pub work_done: f64,

    /// Colleagues and outside contacts, weights summing to one
    pub contacts: Vec<Contact>,
}

impl Employee {
    /// Adds `amount` of work, capped at one.
    pub fn add_work(&mut self, amount: f64) {
        self.work_done = (self.work_done + amount).min(1.0);
    }
}

// ============================================================================
// ATTACKERS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attacker {
    pub id: AttackerId,

    pub intention: Intention,

    /// Chance of acting each tick
    pub activity: f64,

    /// Candidate victims weighted by media presence
    pub targets: Vec<Contact>,

    /// Devices this attacker currently controls
    pub captured: BTreeSet<NodeId>,
}

impl Attacker {
    pub fn new(id: AttackerId, activity: f64) -> Self {
        Self {
            id,
            intention: Intention::Phishing,
            activity,
            targets: Vec::new(),
            captured: BTreeSet::new(),
        }
    }

    /// Adds a captured device and switches to escalation.
    pub fn capture(&mut self, device: NodeId) {
        self.captured.insert(device);
        self.intention = Intention::Escalate;
    }

    /// Drops a cleaned device; falls back to phishing when nothing is left.
    pub fn release(&mut self, device: NodeId) {
        self.captured.remove(&device);
        if self.captured.is_empty() {
            self.intention = Intention::Phishing;
        }
    }
}

/// What a device is used for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Role {
    /// Plain forwarding device (gateways, idle machines)
    Device,

    Defender(Employee),

    Attacker(Attacker),
}

impl Role {
    pub fn employee(&self) -> Option<&Employee> {
        match self {
            Role::Defender(e) => Some(e),
            _ => None,
        }
    }

    pub fn employee_mut(&mut self) -> Option<&mut Employee> {
        match self {
            Role::Defender(e) => Some(e),
            _ => None,
        }
    }

    pub fn attacker(&self) -> Option<&Attacker> {
        match self {
            Role::Attacker(a) => Some(a),
            _ => None,
        }
    }

    pub fn attacker_mut(&mut self) -> Option<&mut Attacker> {
        match self {
            Role::Attacker(a) => Some(a),
            _ => None,
        }
    }

    /// True for roles that take part in the decide phase.
    pub fn is_agent(&self) -> bool {
        !matches!(self, Role::Device)
    }
}

// ============================================================================
// DECIDE
// ============================================================================

/// Read-only view handed to agents during decide.
#[derive(Debug, Clone, Copy)]
pub struct WorldView<'a> {
    pub network: &'a Network,

    pub tick: Tick,
}

/// Deferred intent produced by decide.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Idle,

    Correspond {
        from: NodeId,
        to: NodeId,
        intention: Intention,
    },
}

/// Chooses this tick's action for the agent at `id`.
///
/// Every agent consumes one activity draw per tick, active or not.
pub fn decide<R: Rng + ?Sized>(id: NodeId, role: &Role, view: &WorldView<'_>, rng: &mut R) -> Action {
    match role {
        Role::Device => Action::Idle,
        Role::Defender(employee) => {
            let draw: f64 = rng.gen();
            if draw >= employee.activity {
                return Action::Idle;
            }
            match pick_weighted(&employee.contacts, rng) {
                Some(to) if to != id && view.network.is_device(to) => Action::Correspond {
                    from: id,
                    to,
                    intention: Intention::Work,
                },
                _ => Action::Idle,
            }
        }
        Role::Attacker(attacker) => {
            let draw: f64 = rng.gen();
            if draw >= attacker.activity {
                return Action::Idle;
            }
            if attacker.captured.is_empty() {
                match pick_weighted(&attacker.targets, rng) {
                    Some(to) if view.network.is_device(to) => Action::Correspond {
                        from: id,
                        to,
                        intention: Intention::Phishing,
                    },
                    _ => Action::Idle,
                }
            } else {
                let index = rng.gen_range(0..attacker.captured.len());
                match attacker.captured.iter().nth(index) {
                    Some(&to) => Action::Correspond {
                        from: id,
                        to,
                        intention: Intention::Escalate,
                    },
                    None => Action::Idle,
                }
            }
        }
    }
}

fn pick_weighted<R: Rng + ?Sized>(table: &[Contact], rng: &mut R) -> Option<NodeId> {
    let dist = WeightedIndex::new(table.iter().map(|c| c.weight)).ok()?;
    table.get(dist.sample(rng)).map(|c| c.device)
}

// ============================================================================
// POPULATION
// ============================================================================

/// Builds a weighted contact table of `count` entries drawn uniformly from `pool`.
pub fn sample_contacts<R: Rng + ?Sized>(pool: &[NodeId], count: usize, rng: &mut R) -> Vec<Contact> {
    if pool.is_empty() {
        return Vec::new();
    }
    (0..count)
        .map(|_| Contact {
            device: pool[rng.gen_range(0..pool.len())],
            weight: rng.gen::<f64>(),
        })
        .collect()
}

/// Builds an attacker target table, choosing victims by media presence.
pub fn sample_targets<R: Rng + ?Sized>(
    candidates: &[(NodeId, f64)],
    count: usize,
    rng: &mut R,
) -> Vec<Contact> {
    let Ok(dist) = WeightedIndex::new(candidates.iter().map(|&(_, presence)| presence.max(0.0))) else {
        return Vec::new();
    };
    let mut targets: Vec<Contact> = (0..count)
        .map(|_| Contact {
            device: candidates[dist.sample(rng)].0,
            weight: rng.gen::<f64>(),
        })
        .collect();
    normalize(&mut targets);
    targets
}

/// Scales weights to sum to one. Leaves an all-zero table unchanged.
pub fn normalize(table: &mut [Contact]) {
    let total: f64 = table.iter().map(|c| c.weight).sum();
    if total > 0.0 {
        for contact in table.iter_mut() {
            contact.weight /= total;
        }
    }
}

/// Role factory used by the world builder.
///
/// Employees get company security around their organization's budget;
/// attackers are numbered in creation order.
#[derive(Debug, Clone)]
pub struct PopulationFactory {
    /// Security budget per organization
    pub budgets: Vec<f64>,

    /// Width of the company security spread (six standard deviations)
    pub deviation_width: f64,

    pub employee_max_activity: f64,

    pub attacker_max_activity: f64,

    next_attacker: usize,
}

impl PopulationFactory {
    pub fn new(budgets: Vec<f64>) -> Self {
        Self {
            budgets,
            deviation_width: 0.25,
            employee_max_activity: 0.5,
            attacker_max_activity: 0.1,
            next_attacker: 0,
        }
    }

    pub fn with_deviation_width(mut self, width: f64) -> Self {
        self.deviation_width = width;
        self
    }

    pub fn with_activity(mut self, employee_max: f64, attacker_max: f64) -> Self {
        self.employee_max_activity = employee_max;
        self.attacker_max_activity = attacker_max;
        self
    }

    /// Number of attackers created so far.
    pub fn attackers_created(&self) -> usize {
        self.next_attacker
    }

    pub fn make_employee<R: Rng + ?Sized>(&self, org: OrgId, rng: &mut R) -> Employee {
        let account_type = AccountType::sample(rng);
        let personal = account_type.personal_security(rng);

        let budget = self.budgets.get(org.0).copied().unwrap_or(0.5);
        let company = match Normal::new(budget, self.deviation_width / 6.0) {
            Ok(normal) => normal.sample(rng).clamp(0.0, 1.0),
            Err(_) => budget.clamp(0.0, 1.0),
        };

        Employee {
            org,
            account_type,
            user_security: 0.3 * company + 0.7 * personal,
            activity: rng.gen::<f64>() * self.employee_max_activity,
            media_presence: rng.gen::<f64>(),
            work_done: 0.0,
            contacts: Vec::new(),
        }
    }

    pub fn make_attacker<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Attacker {
        let id = AttackerId(self.next_attacker);
        self.next_attacker += 1;
        Attacker::new(id, rng.gen::<f64>() * self.attacker_max_activity)
    }
}

impl RoleFactory for PopulationFactory {
    fn create_role(&mut self, slot: &DeviceSlot, rng: &mut dyn RngCore) -> Role {
        match (slot.kind, slot.org) {
            (SlotKind::Employee, Some(org)) => Role::Defender(self.make_employee(org, rng)),
            (SlotKind::Attacker, _) => Role::Attacker(self.make_attacker(rng)),
            _ => Role::Device,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::NetworkBuilder;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn employee(activity: f64, contacts: Vec<Contact>) -> Employee {
        Employee {
            org: OrgId(0),
            account_type: AccountType::BackOffice,
            user_security: 0.4,
            activity,
            media_presence: 0.5,
            work_done: 0.0,
            contacts,
        }
    }

    fn small_network() -> Network {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let mut factory = PopulationFactory::new(vec![0.5, 0.5]);
        NetworkBuilder::new()
            .flat_organizations(&[4, 4])
            .with_attacker_slots(1)
            .build(&mut rng, &mut factory)
    }

    #[test]
    fn test_account_security_ranges() {
        let mut rng = ChaCha8Rng::seed_from_u64(8);
        for _ in 0..200 {
            let kind = AccountType::sample(&mut rng);
            let (low, high) = kind.security_range();
            let s = kind.personal_security(&mut rng);
            assert!(s >= low && s < high);
        }
    }

    #[test]
    fn test_work_is_capped() {
        let mut e = employee(0.5, vec![]);
        e.add_work(0.7);
        e.add_work(0.7);
        assert_eq!(e.work_done, 1.0);
    }

    #[test]
    fn test_inactive_employee_idles() {
        let network = small_network();
        let view = WorldView { network: &network, tick: 1 };
        let mut rng = ChaCha8Rng::seed_from_u64(2);

        let role = Role::Defender(employee(0.0, vec![Contact { device: NodeId(3), weight: 1.0 }]));
        for _ in 0..20 {
            assert_eq!(decide(NodeId(2), &role, &view, &mut rng), Action::Idle);
        }
    }

    #[test]
    fn test_empty_contacts_idle() {
        let network = small_network();
        let view = WorldView { network: &network, tick: 1 };
        let mut rng = ChaCha8Rng::seed_from_u64(2);

        let role = Role::Defender(employee(1.0, vec![]));
        assert_eq!(decide(NodeId(2), &role, &view, &mut rng), Action::Idle);

        let attacker = Role::Attacker(Attacker::new(AttackerId(0), 1.0));
        assert_eq!(decide(NodeId(2), &attacker, &view, &mut rng), Action::Idle);
    }

    #[test]
    fn test_active_employee_corresponds() {
        let network = small_network();
        let employees = network.employees();
        let (me, peer) = (employees[0], employees[1]);

        let view = WorldView { network: &network, tick: 1 };
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let role = Role::Defender(employee(1.0, vec![Contact { device: peer, weight: 1.0 }]));

        assert_eq!(
            decide(me, &role, &view, &mut rng),
            Action::Correspond { from: me, to: peer, intention: Intention::Work }
        );
    }

    #[test]
    fn test_attacker_escalates_captured() {
        let network = small_network();
        let victim = network.employees()[0];
        let view = WorldView { network: &network, tick: 1 };
        let mut rng = ChaCha8Rng::seed_from_u64(4);

        let mut attacker = Attacker::new(AttackerId(0), 1.0);
        attacker.capture(victim);
        assert_eq!(attacker.intention, Intention::Escalate);

        let me = NodeId(0);
        assert_eq!(
            decide(me, &Role::Attacker(attacker.clone()), &view, &mut rng),
            Action::Correspond { from: me, to: victim, intention: Intention::Escalate }
        );

        attacker.release(victim);
        assert_eq!(attacker.intention, Intention::Phishing);
    }

    #[test]
    fn test_targets_follow_media_presence() {
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let candidates = vec![(NodeId(1), 0.0), (NodeId(2), 1.0)];
        let targets = sample_targets(&candidates, 5, &mut rng);

        assert_eq!(targets.len(), 5);
        assert!(targets.iter().all(|t| t.device == NodeId(2)));
        let total: f64 = targets.iter().map(|t| t.weight).sum();
        assert!((total - 1.0).abs() < 1e-9);

        // Nobody visible, nobody targeted
        assert!(sample_targets(&[(NodeId(1), 0.0)], 3, &mut rng).is_empty());
    }

    #[test]
    fn test_factory_assigns_roles() {
        let mut rng = ChaCha8Rng::seed_from_u64(6);
        let mut factory = PopulationFactory::new(vec![0.9]);

        let slot = DeviceSlot { org: Some(OrgId(0)), kind: SlotKind::Employee };
        match factory.create_role(&slot, &mut rng) {
            Role::Defender(e) => {
                assert!((0.0..=1.0).contains(&e.user_security));
                assert!(e.activity < 0.5);
            }
            other => panic!("expected employee, got {:?}", other),
        }

        let slot = DeviceSlot { org: None, kind: SlotKind::Attacker };
        assert!(matches!(factory.create_role(&slot, &mut rng), Role::Attacker(a) if a.id == AttackerId(0)));
        assert!(matches!(factory.create_role(&slot, &mut rng), Role::Attacker(a) if a.id == AttackerId(1)));

        let slot = DeviceSlot { org: Some(OrgId(0)), kind: SlotKind::Gateway };
        assert_eq!(factory.create_role(&slot, &mut rng), Role::Device);
    }
}
