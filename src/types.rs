// src/types.rs
use crate::config::RunConfig;
use crate::drivers::pipeline::RunOutcome;
use crate::drivers::variants::MeasurementKind;

// 连接模式
#[derive(PartialEq, Clone, Copy, Debug)]
pub enum ConnectionMode {
    Simulation,
    Hardware,
}

// 前端发给后台的命令
#[derive(Clone, Debug)]
pub enum EngineCommand {
    Run(Box<RunConfig>),
    // 先做应力测试，成功后再做一次转移特性
    StressSequence {
        stress: Box<RunConfig>,
        transfer: Box<RunConfig>,
    },
    Shutdown,
}

// 后台发给前端的消息
#[derive(Clone, Debug)]
pub enum EngineMessage {
    Log(String),
    Started(MeasurementKind),
    Finished(Box<RunOutcome>),
    // 序列结束，参数为已完成的测量次数
    SequenceDone(usize),
}
