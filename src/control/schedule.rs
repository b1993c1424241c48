use std::time::Duration;

use tokio::time::Instant;

/// Расписание циклов очистки: пауза доставки, затем очистка и возобновление.
///
/// Первый цикл начинается через `initial_delay` после запуска контроллера.
/// Доставка стоит `pause`, после чего очередь очищается и воркер
/// перезапускается. Если задан `interval`, следующий цикл начинается через
/// `interval` после возобновления.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushSchedule {
    pub initial_delay: Duration,
    pub pause: Duration,
    pub interval: Option<Duration>,
}

/// Следующее плановое действие контроллера.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulePhase {
    /// Остановить доставку
    Pause,
    /// Очистить очередь и возобновить доставку
    Resume,
}

/// Текущее положение в расписании.
#[derive(Debug, Clone)]
pub struct ScheduleState {
    schedule: FlushSchedule,
    next: Option<(Instant, SchedulePhase)>,
}

impl FlushSchedule {
    /// Однократный цикл: пауза через `initial_delay` длительностью `pause`.
    pub fn once(
        initial_delay: Duration,
        pause: Duration,
    ) -> Self {
        Self {
            initial_delay,
            pause,
            interval: None,
        }
    }

    pub fn with_interval(
        mut self,
        interval: Duration,
    ) -> Self {
        self.interval = Some(interval);
        self
    }
}

impl ScheduleState {
    pub fn new(
        schedule: FlushSchedule,
        now: Instant,
    ) -> Self {
        Self {
            schedule,
            next: Some((now + schedule.initial_delay, SchedulePhase::Pause)),
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.next.map(|(at, _)| at)
    }

    pub fn phase(&self) -> Option<SchedulePhase> {
        self.next.map(|(_, phase)| phase)
    }

    /// Переходит к следующему действию после выполнения текущего в момент
    /// `now`.
    pub fn advance(
        &mut self,
        now: Instant,
    ) {
        self.next = match self.next {
            Some((_, SchedulePhase::Pause)) => Some((now + self.schedule.pause, SchedulePhase::Resume)),
            Some((_, SchedulePhase::Resume)) => self
                .schedule
                .interval
                .map(|interval| (now + interval, SchedulePhase::Pause)),
            None => None,
        };
    }

    /// Откладывает текущее действие на `delay`, не меняя фазу.
    pub fn retry_after(
        &mut self,
        now: Instant,
        delay: Duration,
    ) {
        if let Some((_, phase)) = self.next {
            self.next = Some((now + delay, phase));
        }
    }
}

impl Default for FlushSchedule {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(10),
            pause: Duration::from_secs(10),
            interval: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_cycle() {
        let start = Instant::now();
        let mut state = ScheduleState::new(
            FlushSchedule::once(Duration::from_secs(10), Duration::from_secs(5)),
            start,
        );

        assert_eq!(state.phase(), Some(SchedulePhase::Pause));
        assert_eq!(state.deadline(), Some(start + Duration::from_secs(10)));

        let paused_at = start + Duration::from_secs(10);
        state.advance(paused_at);
        assert_eq!(state.phase(), Some(SchedulePhase::Resume));
        assert_eq!(state.deadline(), Some(paused_at + Duration::from_secs(5)));

        state.advance(paused_at + Duration::from_secs(5));
        assert_eq!(state.deadline(), None);
        assert_eq!(state.phase(), None);
    }

    #[test]
    fn test_repeating_cycle() {
        let start = Instant::now();
        let schedule = FlushSchedule::once(Duration::from_secs(1), Duration::from_secs(2))
            .with_interval(Duration::from_secs(30));
        let mut state = ScheduleState::new(schedule, start);

        state.advance(start);
        state.advance(start);
        assert_eq!(state.phase(), Some(SchedulePhase::Pause));
        assert_eq!(state.deadline(), Some(start + Duration::from_secs(30)));
    }

    #[test]
    fn test_retry_keeps_phase() {
        let start = Instant::now();
        let mut state = ScheduleState::new(FlushSchedule::default(), start);
        state.advance(start);

        state.retry_after(start, Duration::from_secs(1));
        assert_eq!(state.phase(), Some(SchedulePhase::Resume));
        assert_eq!(state.deadline(), Some(start + Duration::from_secs(1)));

        // После завершения однократного цикла повторять нечего
        state.advance(start);
        state.retry_after(start, Duration::from_secs(1));
        assert_eq!(state.deadline(), None);
    }
}
