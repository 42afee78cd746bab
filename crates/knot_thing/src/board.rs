//! Placa simulada no host: relógio monotônico, LED no log e botão de reset
//! representado por um arquivo.

use std::path::PathBuf;
use std::time::Instant;

use knot_core::hal::Board;
use tracing::{debug, info};

pub struct HostBoard {
    start: Instant,
    reset_flag: PathBuf,
    led: bool,
    pressed: bool,
}

impl HostBoard {
    pub fn new(reset_flag: impl Into<PathBuf>) -> Self {
        Self {
            start: Instant::now(),
            reset_flag: reset_flag.into(),
            led: false,
            pressed: false,
        }
    }
}

impl Board for HostBoard {
    fn now_ms(&self) -> u32 {
        // Trunca como o contador de 32 bits de um microcontrolador
        self.start.elapsed().as_millis() as u32
    }

    fn set_status_led(&mut self, on: bool) {
        if on != self.led {
            self.led = on;
            debug!("LED {}", if on { "●" } else { "○" });
        }
    }

    fn reset_button_pressed(&mut self) -> bool {
        let pressed = self.reset_flag.exists();
        if pressed && !self.pressed {
            info!(
                "Botão de reset pressionado ({} presente)",
                self.reset_flag.display()
            );
        }
        self.pressed = pressed;
        pressed
    }
}
