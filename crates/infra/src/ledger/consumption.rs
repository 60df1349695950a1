//! Activity ↔ inventory reconciliation.
//!
//! Logging a chemical treatment or fertilizer application consumes stock:
//! `dose * area` of the referenced item. This service owns the ordering
//! rules that keep the stock honest across the activity lifecycle:
//!
//! - **log**: debit before persisting the activity; a failed debit means no
//!   activity is recorded.
//! - **revise**: settle the difference between the *stored* consumption and
//!   the replacement payload's consumption - a net delta when the item is
//!   unchanged, debit-new-then-credit-old when it is not. The old amount is
//!   always computed from the dose/area stored at debit time, never from
//!   the incoming revision.
//! - **remove**: credit the stored consumption back, then remove the record.
//!
//! Every step that can fail after stock has already moved is compensated
//! (mirroring movements are applied in reverse), so no failure ordering can
//! leave an item credited or debited for an activity mutation that was
//! aborted. Concurrent writers to the same item are serialized by the
//! dispatcher's optimistic append; the loser sees `Concurrency` and may
//! retry.

use serde_json::Value as JsonValue;
use tracing::{error, warn};

use agrolog_activities::{
    Activity, ActivityCommand, ActivityId, LogActivity, RemoveActivity, ReviseActivity,
    StockConsumption,
};
use agrolog_core::OrganizationId;
use agrolog_events::{EventBus, EventEnvelope};
use agrolog_inventory::{
    CreditStock, DebitStock, InventoryCommand, InventoryItem, InventoryItemId,
};
use chrono::{DateTime, Utc};

use crate::command_dispatcher::{CommandDispatcher, DispatchError};
use crate::event_store::EventStore;

const INVENTORY_ITEM: &str = "inventory.item";
const ACTIVITY: &str = "activity";

/// One stock movement the ledger has applied, kept so a later failure in the
/// same reconciliation can unwind it.
#[derive(Debug, Clone, Copy)]
enum StockMovement {
    Debited(StockConsumption),
    Credited(StockConsumption),
}

/// Coordinates the Activity aggregate and the InventoryItem aggregate so
/// that stock on hand always reflects the net effect of the live activity
/// journal.
#[derive(Debug)]
pub struct ConsumptionLedger<S, B> {
    dispatcher: CommandDispatcher<S, B>,
}

impl<S, B> ConsumptionLedger<S, B> {
    pub fn new(dispatcher: CommandDispatcher<S, B>) -> Self {
        Self { dispatcher }
    }

    pub fn dispatcher(&self) -> &CommandDispatcher<S, B> {
        &self.dispatcher
    }
}

impl<S, B> ConsumptionLedger<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Debit `quantity` from an item's stock.
    ///
    /// Fails with `NotFound` for a missing item and `InsufficientQuantity`
    /// when the stock on hand does not cover the request; either way the
    /// item is left untouched. A zero quantity is a no-op.
    pub fn debit(
        &self,
        organization_id: OrganizationId,
        item_id: InventoryItemId,
        quantity: f64,
        occurred_at: DateTime<Utc>,
    ) -> Result<(), DispatchError> {
        self.dispatcher
            .dispatch(
                organization_id,
                item_id.0,
                INVENTORY_ITEM,
                InventoryCommand::DebitStock(DebitStock {
                    organization_id,
                    item_id,
                    quantity,
                    occurred_at,
                }),
                |_, id| InventoryItem::empty(InventoryItemId::new(id)),
            )
            .map(|_| ())
    }

    /// Credit `quantity` back onto an item's stock (reversal of an earlier
    /// debit; no upper bound).
    pub fn credit(
        &self,
        organization_id: OrganizationId,
        item_id: InventoryItemId,
        quantity: f64,
        occurred_at: DateTime<Utc>,
    ) -> Result<(), DispatchError> {
        self.dispatcher
            .dispatch(
                organization_id,
                item_id.0,
                INVENTORY_ITEM,
                InventoryCommand::CreditStock(CreditStock {
                    organization_id,
                    item_id,
                    quantity,
                    occurred_at,
                }),
                |_, id| InventoryItem::empty(InventoryItemId::new(id)),
            )
            .map(|_| ())
    }

    /// Log a new activity, debiting its consumption first.
    ///
    /// If the payload consumes stock, the debit happens before the activity
    /// is persisted and a debit failure aborts the whole operation - no
    /// activity record exists afterwards. If persisting the activity fails
    /// after a successful debit, the debit is compensated.
    ///
    /// Returns the consumed item id, if any.
    pub fn log_activity(
        &self,
        cmd: LogActivity,
    ) -> Result<Option<InventoryItemId>, DispatchError> {
        let organization_id = cmd.organization_id;
        let occurred_at = cmd.occurred_at;
        let consumption = cmd.details.consumption();

        let mut movements = Vec::new();
        if let Some(c) = consumption {
            self.debit(organization_id, c.item_id, c.quantity, occurred_at)?;
            movements.push(StockMovement::Debited(c));
        }

        let activity_id = cmd.activity_id;
        match self.dispatcher.dispatch(
            organization_id,
            activity_id.0,
            ACTIVITY,
            ActivityCommand::LogActivity(cmd),
            |_, id| Activity::empty(ActivityId::new(id)),
        ) {
            Ok(_) => Ok(consumption.map(|c| c.item_id)),
            Err(err) => {
                self.unwind(organization_id, &movements, occurred_at);
                Err(err)
            }
        }
    }

    /// Revise an activity, settling the stock difference.
    ///
    /// The replacement payload fully supersedes the stored one. Stock is
    /// settled before the revision is persisted:
    ///
    /// - same item before and after: one net debit (growth) or credit
    ///   (shrinkage) of the difference;
    /// - item changed, added or dropped: the new item is debited *first*,
    ///   then the old one is credited - so a failed debit aborts with
    ///   nothing moved.
    ///
    /// Any later failure unwinds whatever moved. Returns the item the
    /// revised activity consumes from, if any.
    pub fn revise_activity(
        &self,
        cmd: ReviseActivity,
    ) -> Result<Option<InventoryItemId>, DispatchError> {
        let organization_id = cmd.organization_id;
        let occurred_at = cmd.occurred_at;

        let activity = self.load_live_activity(organization_id, cmd.activity_id)?;

        // The reversal amount is the one stored at debit time; the incoming
        // payload only determines the new debit.
        let old = activity.consumption();
        let new = cmd.details.consumption();

        let movements = self.settle(organization_id, old, new, occurred_at)?;

        match self.dispatcher.dispatch(
            organization_id,
            cmd.activity_id.0,
            ACTIVITY,
            ActivityCommand::ReviseActivity(cmd),
            |_, id| Activity::empty(ActivityId::new(id)),
        ) {
            Ok(_) => Ok(new.map(|c| c.item_id)),
            Err(err) => {
                self.unwind(organization_id, &movements, occurred_at);
                Err(err)
            }
        }
    }

    /// Remove an activity, crediting its stored consumption back.
    ///
    /// The credit runs before the record is removed. An item that no longer
    /// exists (deleted by external inventory management since the debit) is
    /// tolerated with a warning - the removal still proceeds; every other
    /// credit failure aborts it.
    pub fn remove_activity(&self, cmd: RemoveActivity) -> Result<(), DispatchError> {
        let organization_id = cmd.organization_id;
        let occurred_at = cmd.occurred_at;

        let activity = self.load_live_activity(organization_id, cmd.activity_id)?;

        let mut movements = Vec::new();
        if let Some(c) = activity.consumption() {
            match self.credit(organization_id, c.item_id, c.quantity, occurred_at) {
                Ok(()) => movements.push(StockMovement::Credited(c)),
                Err(err) if err.is_not_found() => {
                    warn!(
                        item_id = %c.item_id,
                        quantity = c.quantity,
                        "skipping stock credit for removed activity: item no longer exists"
                    );
                }
                Err(err) => return Err(err),
            }
        }

        match self.dispatcher.dispatch(
            organization_id,
            cmd.activity_id.0,
            ACTIVITY,
            ActivityCommand::RemoveActivity(cmd),
            |_, id| Activity::empty(ActivityId::new(id)),
        ) {
            Ok(_) => Ok(()),
            Err(err) => {
                self.unwind(organization_id, &movements, occurred_at);
                Err(err)
            }
        }
    }

    fn load_live_activity(
        &self,
        organization_id: OrganizationId,
        activity_id: ActivityId,
    ) -> Result<Activity, DispatchError> {
        let activity = self.dispatcher.load(organization_id, activity_id.0, |_, id| {
            Activity::empty(ActivityId::new(id))
        })?;

        if !activity.is_live() {
            return Err(DispatchError::NotFound);
        }
        Ok(activity)
    }

    /// Move stock from the old consumption to the new one.
    ///
    /// Returns the movements actually applied so the caller can unwind them
    /// if the enclosing mutation fails later.
    fn settle(
        &self,
        organization_id: OrganizationId,
        old: Option<StockConsumption>,
        new: Option<StockConsumption>,
        occurred_at: DateTime<Utc>,
    ) -> Result<Vec<StockMovement>, DispatchError> {
        let mut movements = Vec::new();

        match (old, new) {
            (Some(old), Some(new)) if old.item_id == new.item_id => {
                // Same item: one conditional net movement instead of a
                // credit-then-debit pair, so an over-debit cannot strand an
                // intermediate credit.
                let delta = new.quantity - old.quantity;
                if delta > 0.0 {
                    let grow = StockConsumption {
                        item_id: new.item_id,
                        quantity: delta,
                    };
                    self.debit(organization_id, grow.item_id, grow.quantity, occurred_at)?;
                    movements.push(StockMovement::Debited(grow));
                } else if delta < 0.0 {
                    let shrink = StockConsumption {
                        item_id: new.item_id,
                        quantity: -delta,
                    };
                    self.credit(organization_id, shrink.item_id, shrink.quantity, occurred_at)?;
                    movements.push(StockMovement::Credited(shrink));
                }
            }
            (old, new) => {
                // Debit the new item before crediting the old one: if the
                // debit fails, nothing has moved yet.
                if let Some(c) = new {
                    self.debit(organization_id, c.item_id, c.quantity, occurred_at)?;
                    movements.push(StockMovement::Debited(c));
                }
                if let Some(c) = old {
                    if let Err(err) = self.credit(organization_id, c.item_id, c.quantity, occurred_at) {
                        self.unwind(organization_id, &movements, occurred_at);
                        return Err(err);
                    }
                    movements.push(StockMovement::Credited(c));
                }
            }
        }

        Ok(movements)
    }

    /// Reverse already-applied movements, most recent first.
    ///
    /// Compensation is best-effort: a failure here (e.g. a concurrent
    /// consumer took the stock a compensating debit needs) is logged rather
    /// than propagated, since the original error is the one the caller must
    /// see.
    fn unwind(
        &self,
        organization_id: OrganizationId,
        movements: &[StockMovement],
        occurred_at: DateTime<Utc>,
    ) {
        for movement in movements.iter().rev() {
            let result = match movement {
                StockMovement::Debited(c) => {
                    self.credit(organization_id, c.item_id, c.quantity, occurred_at)
                }
                StockMovement::Credited(c) => {
                    self.debit(organization_id, c.item_id, c.quantity, occurred_at)
                }
            };
            if let Err(err) = result {
                error!(?err, ?movement, "failed to compensate stock movement");
            }
        }
    }
}
