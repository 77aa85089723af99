use ilproxy::il::{self, OpCode, StackCount, Value};
use ilproxy::proxy::{
    Error, Interceptor, InterceptorPipeline, Invocation, ProxyContract, ProxyGenerator, Settings,
};
use ilproxy::types::*;

use clap::{value_parser, Arg, ArgMatches, Command};
use std::process::exit;
use std::sync::Arc;

fn main() -> Result<(), Error> {
    env_logger::init();

    let matches = Command::new("IL proxy generator")
        .version(clap::crate_version!())
        .about("Inspect the instruction catalog and generate sample proxy types")
        .subcommand_required(true)
        .subcommand(Command::new("catalog").about("Lists every supported instruction"))
        .subcommand(
            Command::new("opcode")
                .about("Looks up one instruction by numeric code")
                .arg(
                    Arg::new("CODE")
                        .help("Decimal or 0x-prefixed hexadecimal code (eg. 0xFE09)")
                        .required(true)
                        .index(1),
                ),
        )
        .subcommand(
            Command::new("demo")
                .about("Builds a class proxy, calls it, and dumps the generated code")
                .arg(
                    Arg::new("shards")
                        .long("shards")
                        .value_name("N")
                        .help("Sets the number of proxy cache shards")
                        .value_parser(value_parser!(usize))
                        .default_value("16"),
                ),
        )
        .get_matches();

    match matches.subcommand() {
        Some(("catalog", _)) => print_catalog(),
        Some(("opcode", sub_matches)) => print_opcode(sub_matches),
        Some(("demo", sub_matches)) => run_demo(sub_matches)?,
        _ => exit(2),
    }

    Ok(())
}

fn stack_count(count: StackCount) -> String {
    match count {
        StackCount::Fixed(n) => n.to_string(),
        StackCount::Variable => String::from("var"),
    }
}

fn print_catalog() {
    println!("{:<8} {:<12} {:<10} {:>4} {:>6}", "CODE", "NAME", "OPERAND", "POPS", "PUSHES");
    for opcode in OpCode::CATALOG {
        println!(
            "{:<8} {:<12} {:<10} {:>4} {:>6}",
            format!("0x{:02X}", opcode.code),
            opcode.name,
            format!("{:?}", opcode.operand),
            stack_count(opcode.stack.pops),
            stack_count(opcode.stack.pushes),
        );
    }
}

fn parse_code(code: &str) -> Option<u16> {
    match code.strip_prefix("0x").or_else(|| code.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16).ok(),
        None => code.parse::<u16>().ok(),
    }
}

fn print_opcode(matches: &ArgMatches) {
    let code = matches
        .get_one::<String>("CODE")
        .map(String::as_str)
        .unwrap_or_default();
    let opcode = match parse_code(code).and_then(OpCode::lookup) {
        Some(opcode) => opcode,
        None => {
            eprintln!("Unsupported instruction code '{}'", code);
            exit(1);
        }
    };
    println!("name:    {}", opcode.name);
    println!("code:    0x{:02X}", opcode.code);
    println!("operand: {:?} ({} bytes)", opcode.operand, opcode.operand_width());
    println!(
        "stack:   pops {}, pushes {}",
        stack_count(opcode.stack.pops),
        stack_count(opcode.stack.pushes)
    );
    println!("flow:    {:?}", opcode.flow);
}

/// Interceptor that logs each call and its outcome
struct Tracing;

impl Interceptor for Tracing {
    fn intercept(&self, invocation: &Invocation) -> Result<(), il::Error> {
        println!(
            "  -> {:?} with {:?}",
            invocation.method(),
            invocation.arguments()
        );
        invocation.proceed()?;
        println!("  <- {:?}", invocation.return_value());
        Ok(())
    }
}

fn run_demo(matches: &ArgMatches) -> Result<(), Error> {
    let mut settings = Settings::new();
    if let Some(shards) = matches.get_one::<usize>("shards") {
        settings.cache_shard_amount = *shards;
    }
    let generator = ProxyGenerator::new(settings)?;

    // class Demo.Greeter { virtual string Greet(string name); virtual int32 Length(string s); }
    let mut greeter = TypeBuilder::new(
        "Demo.Greeter",
        Some(&generator.runtime().object),
        TypeFlags::PUBLIC,
    );
    greeter.add_method(MethodSpec::constructor(
        vec![],
        il::NativeMethod::new(|_, _| Ok(Value::Null)),
    ));
    greeter.add_method(MethodSpec {
        name: String::from("Greet"),
        signature: MethodSignature::new(vec![TypeRef::String], Some(TypeRef::String)),
        flags: MethodFlags::public_virtual(),
        implementation: Some(il::NativeMethod::new(|_, arguments| {
            let name = arguments.first().and_then(Value::as_str).unwrap_or("stranger");
            Ok(Value::from(format!("Hello, {}!", name)))
        })),
    });
    greeter.add_method(MethodSpec {
        name: String::from("Length"),
        signature: MethodSignature::new(vec![TypeRef::String], Some(TypeRef::INT32)),
        flags: MethodFlags::public_virtual(),
        implementation: Some(il::NativeMethod::new(|_, arguments| {
            let length = arguments.first().and_then(Value::as_str).map_or(0, str::len);
            Ok(Value::Int32(length as i32))
        })),
    });
    let greeter = greeter.build();
    let greet = greeter
        .find_method("Greet")
        .ok_or(il::Error::InvalidState("demo type has no Greet"))?;
    let length = greeter
        .find_method("Length")
        .ok_or(il::Error::InvalidState("demo type has no Length"))?;

    let contract = ProxyContract::new(&greeter, vec![greet.clone()]);
    let pipeline = InterceptorPipeline::new(vec![Arc::new(Tracing) as Arc<dyn Interceptor>]);
    let proxy_type = generator.get_or_build(&contract, &pipeline)?;
    let again = generator.get_or_build(&contract, &pipeline)?;
    log::info!("Cached proxy reused: {}", Arc::ptr_eq(&proxy_type, &again));

    let proxy = proxy_type.instantiate(&[])?;
    println!("Calling {}::Greet (intercepted)", proxy_type.name());
    let greeting = il::invoke_virtual(&proxy, &greet, &[Value::from("world")])?;
    println!("  = {:?}", greeting);
    println!("Calling {}::Length (not intercepted)", proxy_type.name());
    let measured = il::invoke_virtual(&proxy, &length, &[Value::from("world")])?;
    println!("  = {:?}", measured);

    println!();
    for body in proxy_type.bodies() {
        println!("{}", body);
        let bytes = body.to_bytes().map_err(|_| {
            il::Error::InvalidState("generated body could not be serialized")
        })?;
        let hex: Vec<String> = bytes.iter().map(|byte| format!("{:02X}", byte)).collect();
        println!("  // {}", hex.join(" "));
        println!();
    }

    println!("Cache contents:");
    for (key, value) in generator.cache().entries() {
        println!(
            "  {} ({} members, {:?}) -> {}",
            key.contract.target().name,
            key.contract.members().len(),
            key.pipeline,
            value.name()
        );
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn codes_in_decimal_and_hex() {
        assert_eq!(parse_code("42"), Some(42));
        assert_eq!(parse_code("0x2A"), Some(0x2A));
        assert_eq!(parse_code("0XFE09"), Some(0xFE09));
        assert_eq!(parse_code("0x"), None);
        assert_eq!(parse_code("ret"), None);
        assert_eq!(parse_code("70000"), None);
    }

    #[test]
    fn parsed_codes_find_catalog_entries() {
        assert_eq!(parse_code("0x2A").and_then(OpCode::lookup), Some(&OpCode::RET));
        assert_eq!(parse_code("0xFE0C").and_then(OpCode::lookup), Some(&OpCode::LDLOC));
        assert!(parse_code("0xFFFF").and_then(OpCode::lookup).is_none());
    }
}
