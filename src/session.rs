//! A compilation session owns the type arena and the diagnostic sink shared
//! by every stage, and runs the stages in order.

use thiserror::Error;
use tracing::{debug_span, info};

use crate::{
    backend::interpreter::{Fault, Interpreter},
    config::Config,
    diagnostics::{DiagnosticSink, report_error},
    frontend::{
        Token,
        ast::{Program, build::ProgramBuilder},
    },
    middle::{
        analysis::{AnalysisError, analyze_program},
        lowering::{LoweringReport, lower_program},
        ty::TypeArena,
        xil::{
            XilModule,
            compile::{CompileError, compile_program},
        },
    },
};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CompileFailure {
    #[error("analysis failed: {0}")]
    Analysis(#[from] AnalysisError),
    #[error("XIL compilation failed: {0}")]
    Compile(#[from] CompileError),
}

pub struct Session {
    pub config: Config,
    pub types: TypeArena,
    pub diagnostics: DiagnosticSink,
}

impl Session {
    pub fn new(config: Config) -> Self {
        Self {
            types: config.type_arena(),
            diagnostics: DiagnosticSink::new(),
            config,
        }
    }

    pub fn builder(&mut self, source: &str) -> ProgramBuilder<'_> {
        ProgramBuilder::new(&mut self.types, source)
    }

    /// Runs analysis waves until the program converges
    pub fn analyze(&mut self, program: &mut Program) -> Result<usize, AnalysisError> {
        let _span = debug_span!("analyze").entered();

        analyze_program(program, &mut self.types, &mut self.diagnostics, &self.config)
    }

    pub fn lower(&mut self, program: &mut Program) -> LoweringReport {
        let _span = debug_span!("lower").entered();

        lower_program(program, &self.types, &self.config)
    }

    /// Analysis, lowering and XIL compilation in one go
    pub fn compile(&mut self, program: &mut Program) -> Result<XilModule, CompileFailure> {
        let waves = self.analyze(program)?;
        let report = self.lower(program);

        let _span = debug_span!("compile").entered();
        let module = compile_program("main", program, &self.types)?;

        info!(
            waves,
            control_flow = report.control_flow,
            peephole = report.peephole,
            methods = module.methods.len(),
            "compiled program"
        );

        Ok(module)
    }

    /// Runs `entry` in a fresh interpreter. Faults are also reported as
    /// diagnostics.
    pub fn execute(&mut self, module: &XilModule, entry: &str, arguments: &[u64]) -> Result<u64, Fault> {
        let mut interpreter = Interpreter::new(module, &self.config);

        interpreter.run(entry, arguments).inspect_err(|fault| {
            report_error!(self.diagnostics, Token::SYNTHESIZED, "runtime-fault", "{fault}");
        })
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::ast::{BinaryOperatorKind, build::ParamSpec};

    #[test]
    fn compiles_and_runs_a_function() {
        let mut session = Session::default();
        let i32 = session.types.i32();

        let mut builder = session.builder("add");
        builder.function(
            "add",
            i32,
            &[ParamSpec::value("a", i32), ParamSpec::value("b", i32)],
            |b| {
                let a = b.ident("a");
                let bb = b.ident("b");
                let sum = b.binary(BinaryOperatorKind::Add, a, bb);
                vec![b.ret(Some(sum))]
            },
        );
        let mut program = builder.finish();

        let module = session.compile(&mut program).unwrap();
        let result = session.execute(&module, "add", &[40, 2]).unwrap();

        assert_eq!(result, 42);
        assert!(!session.diagnostics.has_errors());
    }

    #[test]
    fn faults_become_diagnostics() {
        let mut session = Session::default();
        let void = session.types.void();

        let mut builder = session.builder("boom");
        builder.function("boom", void, &[], |b| {
            let condition = b.boolean(false);
            vec![b.assert(condition, None)]
        });
        let mut program = builder.finish();

        let module = session.compile(&mut program).unwrap();

        assert_eq!(session.execute(&module, "boom", &[]), Err(Fault::Aborted));
        assert_eq!(session.diagnostics.with_tag("runtime-fault").count(), 1);
    }
}
