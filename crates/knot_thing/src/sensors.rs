//! Itens de demonstração alimentados por métricas do host (`sysinfo`).

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use knot_core::hal::{Board, Storage, Transport};
use knot_core::registry::{CallbackError, RegisterError};
use knot_core::types::{EventFlags, FloatValue, IntValue, SensorId, type_id, unit};
use knot_core::Thing;
use sysinfo::{Components, CpuRefreshKind, MemoryRefreshKind, RefreshKind, System};
use tracing::{info, warn};

pub const CPU_USAGE: SensorId = 1;
pub const RAM_USAGE: SensorId = 2;
pub const CPU_TEMP: SensorId = 3;
pub const SWITCH: SensorId = 4;
pub const UPTIME: SensorId = 5;

/// Leituras do host usadas pelos callbacks.
pub struct HostMonitor {
    sys: System,
    components: Components,
}

impl HostMonitor {
    pub fn new() -> Self {
        let mut sys = System::new_with_specifics(
            RefreshKind::nothing()
                .with_cpu(CpuRefreshKind::everything())
                .with_memory(MemoryRefreshKind::everything()),
        );
        // Primeira leitura para inicializar os contadores de CPU
        sys.refresh_cpu_usage();
        Self {
            sys,
            components: Components::new_with_refreshed_list(),
        }
    }

    /// Uso global de CPU (%).
    pub fn cpu_usage(&mut self) -> f32 {
        self.sys.refresh_cpu_usage();
        self.sys.global_cpu_usage()
    }

    /// Memória em uso (% inteiro).
    pub fn ram_percent(&mut self) -> i32 {
        self.sys.refresh_memory();
        let total = self.sys.total_memory() as f64;
        if total <= 0.0 {
            return 0;
        }
        (self.sys.used_memory() as f64 / total * 100.0).round() as i32
    }

    /// Maior temperatura de CPU exposta pelos componentes (°C).
    pub fn cpu_temp(&mut self) -> Option<f32> {
        self.components.refresh(true);
        self.components
            .iter()
            .filter(|c| {
                let label = c.label().to_lowercase();
                label.contains("cpu")
                    || label.contains("tctl")
                    || label.contains("tdie")
                    || label.contains("package")
                    || label.contains("core")
            })
            .filter_map(|c| c.temperature())
            .filter(|t| *t > 0.0 && *t < 150.0)
            .reduce(f32::max)
    }
}

/// Registra os itens de demonstração e sua configuração inicial de eventos.
pub fn register_all<T: Transport, S: Storage, B: Board>(
    thing: &mut Thing<T, S, B>,
    monitor: Rc<RefCell<HostMonitor>>,
) -> Result<(), RegisterError> {
    let m = Rc::clone(&monitor);
    thing.register_float(
        CPU_USAGE,
        "CPU Usage",
        type_id::ANALOG,
        unit::NOT_APPLICABLE,
        Some(Box::new(move || {
            Ok(FloatValue::from_f64(f64::from(m.borrow_mut().cpu_usage())))
        })),
        None,
    )?;

    let m = Rc::clone(&monitor);
    thing.register_integer(
        RAM_USAGE,
        "RAM Usage",
        type_id::ANALOG,
        unit::NOT_APPLICABLE,
        Some(Box::new(move || Ok(IntValue::new(m.borrow_mut().ram_percent())))),
        None,
    )?;

    let m = Rc::clone(&monitor);
    thing.register_float(
        CPU_TEMP,
        "CPU Temp",
        type_id::TEMPERATURE,
        unit::TEMPERATURE_C,
        Some(Box::new(move || {
            m.borrow_mut()
                .cpu_temp()
                .map(|t| FloatValue::from_f64(f64::from(t)))
                .ok_or_else(|| CallbackError("sensor de temperatura indisponível".into()))
        })),
        None,
    )?;

    let state = Rc::new(Cell::new(false));
    let reader = Rc::clone(&state);
    thing.register_boolean(
        SWITCH,
        "Switch",
        type_id::SWITCH,
        unit::NOT_APPLICABLE,
        Some(Box::new(move || Ok(reader.get()))),
        Some(Box::new(move |on| {
            info!("Switch {}", if on { "ligado" } else { "desligado" });
            state.set(on);
            Ok(())
        })),
    )?;

    thing.register_raw(
        UPTIME,
        "Uptime",
        Vec::new(),
        8,
        type_id::COMMAND,
        unit::NOT_APPLICABLE,
        Some(Box::new(|buf: &mut [u8]| {
            let bytes = System::uptime().to_le_bytes();
            buf[..bytes.len()].copy_from_slice(&bytes);
            Ok(bytes.len())
        })),
        None,
    )?;

    let configs = [
        (
            CPU_USAGE,
            EventFlags::UPPER_THRESHOLD | EventFlags::TIME,
            30,
            FloatValue::new(0, 0),
            FloatValue::new(80, 0),
        ),
        (
            RAM_USAGE,
            EventFlags::UPPER_THRESHOLD | EventFlags::TIME,
            60,
            FloatValue::new(0, 0),
            FloatValue::new(90, 0),
        ),
        (
            CPU_TEMP,
            EventFlags::UPPER_THRESHOLD | EventFlags::TIME,
            60,
            FloatValue::new(0, 0),
            FloatValue::new(85, 0),
        ),
        (
            SWITCH,
            EventFlags::CHANGE,
            0,
            FloatValue::default(),
            FloatValue::default(),
        ),
        (
            UPTIME,
            EventFlags::CHANGE,
            0,
            FloatValue::default(),
            FloatValue::default(),
        ),
    ];
    for (id, flags, interval, lower, upper) in configs {
        if let Err(e) = thing.configure(id, flags, interval, Some(lower), Some(upper)) {
            warn!("Configuração do sensor {id} rejeitada: {e}");
        }
    }

    info!("{} itens registrados", thing.registry().len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::HostBoard;
    use crate::transport::TcpTransport;
    use knot_core::hal::MemoryStorage;
    use knot_core::{AppConfig, ValueKind};

    #[test]
    fn demo_items_are_registered() {
        let mut thing = Thing::new(
            TcpTransport::new("127.0.0.1:0"),
            MemoryStorage::new(),
            HostBoard::new("unused"),
            &AppConfig::default(),
        );
        register_all(&mut thing, Rc::new(RefCell::new(HostMonitor::new()))).unwrap();

        let registry = thing.registry();
        assert_eq!(registry.len(), 5);
        assert_eq!(registry.find(CPU_USAGE).unwrap().value_kind(), ValueKind::Float);
        assert_eq!(registry.find(RAM_USAGE).unwrap().value_kind(), ValueKind::Integer);
        assert_eq!(registry.find(SWITCH).unwrap().value_kind(), ValueKind::Boolean);
        assert_eq!(registry.find(UPTIME).unwrap().raw_capacity(), 8);
        assert_eq!(
            registry.find(CPU_USAGE).unwrap().config().event_flags,
            EventFlags::UPPER_THRESHOLD | EventFlags::TIME
        );
    }

    #[test]
    fn ram_reading_is_a_percentage() {
        let mut monitor = HostMonitor::new();
        let ram = monitor.ram_percent();
        assert!((0..=100).contains(&ram));
    }
}
