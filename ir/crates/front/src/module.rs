use std::str::FromStr;

use lalrpop_util::lexer::Token;

use crate::grammar;

pub type ParseError<'input> = lalrpop_util::ParseError<usize, Token<'input>, &'static str>;

pub fn parse(input: &str) -> Result<Module, ParseError<'_>> {
    grammar::ModuleParser::new().parse(input)
}

#[derive(Debug, PartialEq, Eq)]
pub struct Module {
    pub functions: Vec<Function>,
}

#[derive(Debug, PartialEq, Eq)]
pub struct Function {
    pub name: String,
    pub ret_ty: Type,
    pub args: Vec<Type>,
    pub basic_blocks: Vec<BasicBlock>,
}

#[derive(Debug, PartialEq, Eq)]
pub struct Arg {
    pub id: Identifier,
    pub ty: Type,
}

#[derive(Debug, PartialEq, Eq)]
pub struct BasicBlock {
    pub args: Vec<Arg>,
    pub id: Identifier,
    pub instructions: Vec<Instruction>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum Instruction {
    Add(Identifier, Type, Operand, Operand),
    Sub(Identifier, Type, Operand, Operand),
    Cmp(Identifier, Type, CmpOp, Operand, Operand),
    Op(Identifier, Type, Operand),
    /// `dest`, result type, allocated type, element count
    Alloca(Identifier, Type, Type, Option<u32>),
    Load(Identifier, Type, Operand),
    /// `value`, `dest`
    Store(Operand, Operand),
    PtrToInt(Identifier, Type, Operand),
    Ret(Option<Operand>),
    Condbr(Operand, Target, Target),
    Br(Target),
}

impl Instruction {
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            Instruction::Ret(_) | Instruction::Condbr(..) | Instruction::Br(_)
        )
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Gt,
}

#[derive(Debug, PartialEq, Eq)]
pub struct Target(pub Identifier, pub Option<Vec<Operand>>);

#[derive(Debug, PartialEq, Eq)]
pub enum Operand {
    Literal(Literal),
    Value(Identifier),
}

#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum Type {
    Bool,
    U8,
    U16,
    U32,
    U64,
    I8,
    I16,
    I32,
    I64,
    Void,
    Ptr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Literal {
    Int(i64, Type),
    Bool(bool),
}

impl FromStr for Literal {
    type Err = &'static str;

    /// Parses a suffixed integer literal such as `-8i32`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let suffix_start = s
            .find(|c: char| c == 'i' || c == 'u')
            .ok_or("integer literal is missing its type suffix")?;
        let (digits, suffix) = s.split_at(suffix_start);
        let ty = match suffix {
            "i8" => Type::I8,
            "i16" => Type::I16,
            "i32" => Type::I32,
            "i64" => Type::I64,
            "u8" => Type::U8,
            "u16" => Type::U16,
            "u32" => Type::U32,
            "u64" => Type::U64,
            _ => return Err("unknown integer literal suffix"),
        };
        let value = i64::from_str(digits).map_err(|_| "integer literal does not fit into i64")?;
        Ok(Self::Int(value, ty))
    }
}

pub type Identifier = String;
