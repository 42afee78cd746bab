//! Avaliação de eventos: decide quando o valor de um item deve ser enviado.
//!
//! A cada tick um único item é lido, em rodízio pelas posições ocupadas do
//! registro. Thresholds usam travas de histerese para disparar uma vez por
//! cruzamento.

use tracing::debug;

use crate::registry::{DataItem, Hysteresis, ItemConfig, Registry};
use crate::types::{EventFlags, FloatValue, SensorId, Value};

/// Item cujo valor deve ser transmitido.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub id: SensorId,
    pub value: Value,
    /// Condições que dispararam.
    pub events: EventFlags,
}

/// Cursor de rodízio sobre as posições do registro.
#[derive(Debug, Default)]
pub struct EventEvaluator {
    cursor: usize,
}

impl EventEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Posição que será avaliada no próximo tick.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn reset(&mut self) {
        self.cursor = 0;
    }

    /// Avalia o próximo item ocupado. O cursor avança mesmo sem evento.
    pub fn poll_next(&mut self, registry: &mut Registry, now_ms: u32) -> Option<ChangeEvent> {
        let last = registry.last_slot()?;
        if self.cursor > last {
            self.cursor = 0;
        }
        let slot = (self.cursor..=last).find(|&s| registry.item_at(s).is_some())?;
        self.cursor = if slot >= last { 0 } else { slot + 1 };

        let item = registry.item_at_mut(slot)?;
        evaluate(item, now_ms)
    }
}

fn evaluate(item: &mut DataItem, now_ms: u32) -> Option<ChangeEvent> {
    let current = match item.read() {
        Ok(v) => v,
        Err(e) => {
            debug!("Leitura do sensor {} falhou: {e}", item.id());
            return None;
        }
    };

    let flags = item.config.event_flags;
    let mut events = EventFlags::empty();

    match (&current, &item.last_value) {
        (Value::Raw(now), Value::Raw(before)) => {
            if flags.contains(EventFlags::CHANGE) && now != before {
                events |= EventFlags::CHANGE;
                item.last_value = current.clone();
            }
        }
        (Value::Bool(now), Value::Bool(before)) => {
            if now != before && flags.contains(EventFlags::CHANGE) {
                events |= EventFlags::CHANGE;
            }
            item.last_value = current.clone();
        }
        _ => {
            if let Some((value, lower, upper)) = bounds(&current, &item.config) {
                events |= thresholds(value, lower, upper, flags, &mut item.hysteresis);
            }
            if numeric_differs(&current, &item.last_value) && flags.contains(EventFlags::CHANGE) {
                events |= EventFlags::CHANGE;
            }
            item.last_value = current.clone();
        }
    }

    if !matches!(current, Value::Raw(_)) && flags.contains(EventFlags::TIME) {
        let interval_ms = u32::from(item.config.time_interval_s) * 1000;
        if now_ms.wrapping_sub(item.last_send_time) >= interval_ms {
            item.last_send_time = now_ms;
            events |= EventFlags::TIME;
        }
    }

    if events.is_empty() {
        return None;
    }
    debug!("Sensor {} disparou {events:?}", item.id());
    Some(ChangeEvent {
        id: item.id(),
        value: current,
        events,
    })
}

/// Valor e limites na escala de comparação do tipo.
///
/// Inteiros comparam com a parte inteira do limite.
fn bounds(value: &Value, config: &ItemConfig) -> Option<(f64, f64, f64)> {
    let (lo, hi) = (&config.lower_limit, &config.upper_limit);
    match value {
        Value::Int(v) => Some((
            f64::from(v.value),
            f64::from(lo.value_int),
            f64::from(hi.value_int),
        )),
        Value::Float(v) => Some((v.as_f64(), lo.as_f64(), hi.as_f64())),
        Value::Bool(_) | Value::Raw(_) => None,
    }
}

fn thresholds(
    value: f64,
    lower: f64,
    upper: f64,
    flags: EventFlags,
    latch: &mut Hysteresis,
) -> EventFlags {
    let mut fired = EventFlags::empty();
    if value < lower {
        if !latch.lower_latched {
            fired |= flags & EventFlags::LOWER_THRESHOLD;
            latch.lower_latched = true;
            latch.upper_latched = false;
        }
    } else if value > upper {
        if !latch.upper_latched {
            fired |= flags & EventFlags::UPPER_THRESHOLD;
            latch.upper_latched = true;
            latch.lower_latched = false;
        }
    } else {
        *latch = Hysteresis::default();
    }
    fired
}

/// Multiplicador não entra na comparação.
fn numeric_differs(now: &Value, before: &Value) -> bool {
    match (now, before) {
        (Value::Int(a), Value::Int(b)) => a.value != b.value,
        (
            Value::Float(FloatValue {
                value_int: ai,
                value_dec: ad,
                ..
            }),
            Value::Float(FloatValue {
                value_int: bi,
                value_dec: bd,
                ..
            }),
        ) => ai != bi || ad != bd,
        _ => now != before,
    }
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{CallbackError, RawRead};
    use crate::types::{IntValue, type_id, unit};
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    /// Sensor inteiro que devolve a sequência dada, um valor por leitura.
    fn scripted_int(registry: &mut Registry, id: SensorId, values: &[i32]) {
        let mut queue: VecDeque<i32> = values.iter().copied().collect();
        registry
            .register_integer(
                id,
                "Level",
                type_id::SPEED,
                unit::SPEED_KMH,
                Some(Box::new(move || {
                    queue
                        .pop_front()
                        .map(IntValue::new)
                        .ok_or_else(|| CallbackError("sem dados".into()))
                })),
                None,
                0,
            )
            .unwrap();
    }

    /// Sensor float que devolve a sequência `(inteiro, decimal)` dada.
    fn scripted_float(registry: &mut Registry, id: SensorId, values: &[(i32, u32)]) {
        let mut queue: VecDeque<FloatValue> = values
            .iter()
            .map(|&(int, dec)| FloatValue::new(int, dec))
            .collect();
        registry
            .register_float(
                id,
                "Temperature",
                type_id::TEMPERATURE,
                unit::TEMPERATURE_C,
                Some(Box::new(move || {
                    queue.pop_front().ok_or_else(|| CallbackError("sem dados".into()))
                })),
                None,
                0,
            )
            .unwrap();
    }

    fn limits(registry: &mut Registry, id: SensorId, flags: EventFlags) {
        registry
            .configure(
                id,
                flags,
                0,
                Some(FloatValue::new(5, 0)),
                Some(FloatValue::new(10, 0)),
            )
            .unwrap();
    }

    #[test]
    fn threshold_and_change_sequence() {
        let mut registry = Registry::new(4);
        scripted_int(&mut registry, 1, &[4, 6, 11, 9]);
        limits(
            &mut registry,
            1,
            EventFlags::LOWER_THRESHOLD | EventFlags::UPPER_THRESHOLD | EventFlags::CHANGE,
        );

        let mut evaluator = EventEvaluator::new();
        let fired: Vec<EventFlags> = (0..4)
            .map(|tick| evaluator.poll_next(&mut registry, tick).unwrap().events)
            .collect();

        assert_eq!(
            fired,
            vec![
                EventFlags::LOWER_THRESHOLD | EventFlags::CHANGE,
                EventFlags::CHANGE,
                EventFlags::UPPER_THRESHOLD | EventFlags::CHANGE,
                EventFlags::CHANGE,
            ]
        );
    }

    #[test]
    fn lower_threshold_fires_once_while_latched() {
        let mut registry = Registry::new(2);
        scripted_int(&mut registry, 1, &[3, 3, 3]);
        limits(&mut registry, 1, EventFlags::LOWER_THRESHOLD);

        let mut evaluator = EventEvaluator::new();
        let events: Vec<_> = (0..3)
            .filter_map(|tick| evaluator.poll_next(&mut registry, tick))
            .collect();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].events, EventFlags::LOWER_THRESHOLD);
        assert_eq!(events[0].value, Value::Int(IntValue::new(3)));
        assert!(registry.find(1).unwrap().hysteresis().lower_latched);
    }

    #[test]
    fn configure_rearms_latches() {
        let mut registry = Registry::new(2);
        scripted_int(&mut registry, 1, &[3, 3]);
        limits(&mut registry, 1, EventFlags::LOWER_THRESHOLD);

        let mut evaluator = EventEvaluator::new();
        assert!(evaluator.poll_next(&mut registry, 0).is_some());
        limits(&mut registry, 1, EventFlags::LOWER_THRESHOLD);
        assert!(evaluator.poll_next(&mut registry, 1).is_some());
    }

    #[test]
    fn time_event_uses_wrapping_elapsed() {
        let mut registry = Registry::new(2);
        registry
            .register_integer(
                1,
                "Clock",
                type_id::SPEED,
                unit::SPEED_KMH,
                Some(Box::new(|| Ok(IntValue::new(0)))),
                None,
                u32::MAX - 500,
            )
            .unwrap();
        registry
            .configure(1, EventFlags::TIME, 1, None, None)
            .unwrap();

        let mut evaluator = EventEvaluator::new();
        assert!(evaluator.poll_next(&mut registry, 200).is_none());
        let event = evaluator.poll_next(&mut registry, 600).unwrap();
        assert_eq!(event.events, EventFlags::TIME);
        assert_eq!(registry.find(1).unwrap().last_send_time(), 600);
        assert!(evaluator.poll_next(&mut registry, 700).is_none());
    }

    #[test]
    fn raw_only_reports_change() {
        let frames = Rc::new(RefCell::new(VecDeque::from(vec![[1u8, 2], [1, 2], [3, 4]])));
        let source = Rc::clone(&frames);
        let read: RawRead = Box::new(move |buf: &mut [u8]| {
            let frame = source
                .borrow_mut()
                .pop_front()
                .ok_or_else(|| CallbackError("vazio".into()))?;
            buf[..2].copy_from_slice(&frame);
            Ok(2)
        });

        let mut registry = Registry::new(2);
        registry
            .register_raw(
                9,
                "Frame",
                Vec::new(),
                2,
                type_id::COMMAND,
                unit::NOT_APPLICABLE,
                Some(read),
                None,
                0,
            )
            .unwrap();
        registry
            .configure(9, EventFlags::CHANGE | EventFlags::TIME, 0, None, None)
            .unwrap();

        let mut evaluator = EventEvaluator::new();
        let first = evaluator.poll_next(&mut registry, 0).unwrap();
        assert_eq!(first.events, EventFlags::CHANGE);
        assert!(evaluator.poll_next(&mut registry, 1).is_none());
        let third = evaluator.poll_next(&mut registry, 2).unwrap();
        assert_eq!(third.value, Value::Raw(vec![3, 4]));
        assert!(frames.borrow().is_empty());
    }

    #[test]
    fn bool_change_requires_flag() {
        let state = Rc::new(RefCell::new(true));
        let reader = Rc::clone(&state);
        let mut registry = Registry::new(2);
        registry
            .register_boolean(
                2,
                "Door",
                type_id::PRESENCE,
                unit::NOT_APPLICABLE,
                Some(Box::new(move || Ok(*reader.borrow()))),
                None,
                0,
            )
            .unwrap();

        let mut evaluator = EventEvaluator::new();
        assert!(evaluator.poll_next(&mut registry, 0).is_none());
        assert_eq!(
            registry.find(2).unwrap().last_value(),
            &Value::Bool(true)
        );

        registry
            .configure(2, EventFlags::CHANGE, 0, None, None)
            .unwrap();
        *state.borrow_mut() = false;
        let event = evaluator.poll_next(&mut registry, 1).unwrap();
        assert_eq!(event.value, Value::Bool(false));
    }

    #[test]
    fn round_robin_skips_vacant_and_failing_items() {
        let mut registry = Registry::new(4);
        scripted_int(&mut registry, 1, &[]);
        scripted_int(&mut registry, 2, &[7, 8]);
        registry
            .configure(2, EventFlags::CHANGE, 0, None, None)
            .unwrap();

        let mut evaluator = EventEvaluator::new();
        assert!(evaluator.poll_next(&mut registry, 0).is_none());
        assert_eq!(evaluator.cursor(), 1);
        assert_eq!(evaluator.poll_next(&mut registry, 1).unwrap().id, 2);
        assert_eq!(evaluator.cursor(), 0);
        assert!(evaluator.poll_next(&mut registry, 2).is_none());
        assert_eq!(evaluator.poll_next(&mut registry, 3).unwrap().id, 2);
    }

    #[test]
    fn empty_registry_yields_nothing() {
        let mut registry = Registry::new(4);
        let mut evaluator = EventEvaluator::new();
        assert!(evaluator.poll_next(&mut registry, 0).is_none());
    }

    #[test]
    fn float_thresholds_compare_decimal_part() {
        let mut registry = Registry::new(2);
        scripted_float(
            &mut registry,
            3,
            &[(1, 400_000), (1, 450_000), (2, 0), (2, 300_000), (1, 200_000)],
        );
        registry
            .configure(
                3,
                EventFlags::LOWER_THRESHOLD | EventFlags::UPPER_THRESHOLD,
                0,
                Some(FloatValue::new(1, 500_000)),
                Some(FloatValue::new(2, 250_000)),
            )
            .unwrap();

        let mut evaluator = EventEvaluator::new();
        let fired: Vec<Option<EventFlags>> = (0..5)
            .map(|tick| evaluator.poll_next(&mut registry, tick).map(|e| e.events))
            .collect();
        assert_eq!(
            fired,
            vec![
                Some(EventFlags::LOWER_THRESHOLD),
                None,
                None,
                Some(EventFlags::UPPER_THRESHOLD),
                Some(EventFlags::LOWER_THRESHOLD),
            ]
        );
    }

    #[test]
    fn float_change_on_decimal_part_only() {
        let mut registry = Registry::new(2);
        scripted_float(&mut registry, 4, &[(3, 250_000), (3, 250_000), (3, 750_000)]);
        registry
            .configure(4, EventFlags::CHANGE, 0, None, None)
            .unwrap();

        let mut evaluator = EventEvaluator::new();
        assert!(evaluator.poll_next(&mut registry, 0).is_some());
        assert!(evaluator.poll_next(&mut registry, 1).is_none());
        let event = evaluator.poll_next(&mut registry, 2).unwrap();
        assert_eq!(event.events, EventFlags::CHANGE);
        assert_eq!(event.value, Value::Float(FloatValue::new(3, 750_000)));
    }
}
