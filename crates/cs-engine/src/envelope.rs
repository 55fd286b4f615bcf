//! Envelope playback state.

use cs_ir::Envelope;

/// Tracks one envelope's position through playback.
#[derive(Clone, Copy, Debug, Default)]
pub struct EnvelopeState {
    /// Current tick position
    pub position: u16,
    /// Envelope has run past its final node
    pub finished: bool,
}

impl EnvelopeState {
    pub fn reset(&mut self) {
        self.position = 0;
        self.finished = false;
    }

    /// Sample the envelope at the current position.
    pub fn value(&self, envelope: &Envelope) -> i8 {
        envelope.value_at(self.position)
    }

    /// Advance one tick, honouring the sustain loop while the note is
    /// held and the regular loop always.
    pub fn advance(&mut self, envelope: &Envelope, released: bool) {
        if !envelope.is_enabled() || envelope.nodes.is_empty() {
            return;
        }
        self.position = self.position.saturating_add(1);

        if envelope.has_sustain() && !released {
            let end = envelope
                .nodes
                .get(envelope.sustain_end as usize)
                .map_or(0, |node| node.tick);
            if self.position > end {
                let start = envelope
                    .nodes
                    .get(envelope.sustain_start as usize)
                    .map_or(0, |node| node.tick);
                self.position = start;
            }
            return;
        }

        if envelope.is_looped() {
            let end = envelope
                .nodes
                .get(envelope.loop_end as usize)
                .map_or(0, |node| node.tick);
            if self.position > end {
                let start = envelope
                    .nodes
                    .get(envelope.loop_start as usize)
                    .map_or(0, |node| node.tick);
                self.position = start;
            }
            return;
        }

        if self.position >= envelope.end_tick() {
            self.position = envelope.end_tick();
            self.finished = true;
        }
    }
}
