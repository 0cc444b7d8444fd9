//! Recording collaborators.
//!
//! [`RecordingServices`] and [`RecordingCallins`] keep a shared log of every
//! notification the gateway sends so tests can assert on side effects after
//! handing ownership to the gateway.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use gateway_core::prelude::*;
use gateway_core::los::LosBits;

/// One engine notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceEvent {
    /// `move_entity`.
    Moved(EntityRef, Vec3Fixed),
    /// `recompute_los`.
    LosRecomputed(UnitId, AllyTeamId),
    /// `spawn_visual_effect`.
    Effect(String, Vec3Fixed),
    /// `terrain_changed`.
    TerrainChanged(HeightRect),
}

/// Shared handle to a service log.
pub type ServiceLog = Rc<RefCell<Vec<ServiceEvent>>>;

/// Engine services that record every call.
///
/// LOS recomputation answers from a table of canned results, defaulting to
/// nothing visible.
#[derive(Debug, Default)]
pub struct RecordingServices {
    log: ServiceLog,
    los: BTreeMap<(UnitId, AllyTeamId), LosBits>,
}

impl RecordingServices {
    /// Create services and a handle to their log.
    #[must_use]
    pub fn new() -> (Self, ServiceLog) {
        let services = Self::default();
        let log = Rc::clone(&services.log);
        (services, log)
    }

    /// Answer `recompute_los(unit, ally_team)` with `bits`.
    #[must_use]
    pub fn with_los(mut self, unit: UnitId, ally_team: AllyTeamId, bits: LosBits) -> Self {
        self.los.insert((unit, ally_team), bits);
        self
    }
}

impl EngineServices for RecordingServices {
    fn move_entity(&mut self, entity: EntityRef, position: Vec3Fixed) {
        self.log.borrow_mut().push(ServiceEvent::Moved(entity, position));
    }

    fn recompute_los(&mut self, unit: UnitId, ally_team: AllyTeamId) -> LosBits {
        self.log
            .borrow_mut()
            .push(ServiceEvent::LosRecomputed(unit, ally_team));
        self.los
            .get(&(unit, ally_team))
            .copied()
            .unwrap_or(LosBits::EMPTY)
    }

    fn spawn_visual_effect(&mut self, name: &str, position: Vec3Fixed) {
        self.log
            .borrow_mut()
            .push(ServiceEvent::Effect(name.to_owned(), position));
    }

    fn terrain_changed(&mut self, rect: HeightRect) {
        self.log.borrow_mut().push(ServiceEvent::TerrainChanged(rect));
    }
}

/// One callin notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallinEvent {
    /// `unit_created`.
    UnitCreated(UnitId, Option<UnitId>),
    /// `unit_destroyed`.
    UnitDestroyed(UnitId, Option<UnitId>),
    /// `unit_given`.
    UnitGiven {
        /// Unit that changed team.
        unit: UnitId,
        /// Team it left.
        old_team: TeamId,
        /// Whether it was given rather than captured.
        given: bool,
    },
    /// `feature_created`.
    FeatureCreated(FeatureId),
    /// `feature_destroyed`.
    FeatureDestroyed(FeatureId),
    /// `unit_command`.
    UnitCommand(UnitId, i32),
}

/// Script callins that record every notification.
#[derive(Debug, Default)]
pub struct RecordingCallins {
    events: RefCell<Vec<CallinEvent>>,
    deny_transfers: bool,
}

impl RecordingCallins {
    /// Callins that allow resource transfers.
    #[must_use]
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    /// Callins that veto every resource transfer.
    #[must_use]
    pub fn denying_transfers() -> Rc<Self> {
        Rc::new(Self {
            events: RefCell::default(),
            deny_transfers: true,
        })
    }

    /// Events recorded so far.
    #[must_use]
    pub fn events(&self) -> Vec<CallinEvent> {
        self.events.borrow().clone()
    }

    fn push(&self, event: CallinEvent) {
        self.events.borrow_mut().push(event);
    }
}

impl SyncedCallins for RecordingCallins {
    fn unit_created(&self, _gateway: &mut SyncedGateway, unit: UnitId, builder: Option<UnitId>) {
        self.push(CallinEvent::UnitCreated(unit, builder));
    }

    fn unit_destroyed(&self, _gateway: &mut SyncedGateway, unit: UnitId, attacker: Option<UnitId>) {
        self.push(CallinEvent::UnitDestroyed(unit, attacker));
    }

    fn unit_given(&self, _gateway: &mut SyncedGateway, unit: UnitId, old_team: TeamId, given: bool) {
        self.push(CallinEvent::UnitGiven {
            unit,
            old_team,
            given,
        });
    }

    fn feature_created(&self, _gateway: &mut SyncedGateway, feature: FeatureId) {
        self.push(CallinEvent::FeatureCreated(feature));
    }

    fn feature_destroyed(&self, _gateway: &mut SyncedGateway, feature: FeatureId) {
        self.push(CallinEvent::FeatureDestroyed(feature));
    }

    fn unit_command(&self, _gateway: &mut SyncedGateway, unit: UnitId, command: &Command) {
        self.push(CallinEvent::UnitCommand(unit, command.id));
    }

    fn allow_resource_transfer(
        &self,
        _from: TeamId,
        _to: TeamId,
        _kind: ResourceKind,
        _amount: Fixed,
    ) -> bool {
        !self.deny_transfers
    }
}
