//! Control loop composition: windower, delivery controller, console intent

use log::{info, warn};

use crate::command::{Command, ConnectivityIntent};
use crate::controller::DeliveryController;
use crate::events::NodeEvent;
use crate::queue::BufferedQueue;
use crate::sensors::ClimateSensor;
use crate::uplink::Uplink;
use crate::windower::Windower;

/// One telemetry node.
///
/// The platform calls [`Node::step`] from its main loop and feeds console
/// lines to [`Node::handle_command`]; the pulse interrupt talks to the
/// windower's [`crate::windower::PulseCounter`] directly.
pub struct Node<'a, S: ClimateSensor, Q: BufferedQueue, U: Uplink> {
    windower: Windower<'a, S>,
    controller: DeliveryController<'a, Q, U>,
    intent: &'a ConnectivityIntent,
}

impl<'a, S: ClimateSensor, Q: BufferedQueue, U: Uplink> Node<'a, S, Q, U> {
    pub fn new(
        windower: Windower<'a, S>,
        controller: DeliveryController<'a, Q, U>,
        intent: &'a ConnectivityIntent,
    ) -> Self {
        Self {
            windower,
            controller,
            intent,
        }
    }

    /// Announce the reattached backlog.
    pub fn boot(&self) {
        info!("Node up with {} queued record(s)", self.controller.queue().len());
        self.controller.report_queue_size();
    }

    pub fn controller(&self) -> &DeliveryController<'a, Q, U> {
        &self.controller
    }

    pub fn controller_mut(&mut self) -> &mut DeliveryController<'a, Q, U> {
        &mut self.controller
    }

    pub fn windower(&self) -> &Windower<'a, S> {
        &self.windower
    }

    /// Apply one console line. Connectivity commands take effect on the next
    /// [`Self::step`], even when they repeat the current intent.
    pub fn handle_command(&self, line: &str) {
        match Command::parse(line) {
            Command::SetConnected(online) => {
                info!("Console set connectivity intent to {}", online);
                self.intent.set(online);
            }
            Command::Empty => {}
            Command::Unknown(text) => {
                warn!("Ignoring unknown command {:?}", text);
                self.controller.emit(NodeEvent::unknown_command(text));
            }
        }
    }

    /// One main-loop iteration.
    pub async fn step(&mut self, now_ms: u64) {
        match self.intent.take_command() {
            Some(online) => self.controller.command(now_ms, online).await,
            None => self.controller.poll(now_ms, self.intent.get()).await,
        }
        let intent = self.controller.intent();

        if let Some(sample) = self.windower.tick(now_ms, intent).await {
            self.controller.on_sample(now_ms, &sample).await;
        }
    }
}
