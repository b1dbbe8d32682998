//  _____       ______   ____
// |_   _|     |  ____|/ ____|  Institute of Embedded Systems
//   | |  _ __ | |__  | (___    Zurich University of Applied Sciences
//   | | | '_ \|  __|  \___ \   8401 Winterthur, Switzerland
//  _| |_| | | | |____ ____) |
// |_____|_| |_|______|_____/
//
// Copyright 2025 Institute of Embedded Systems at Zurich University of Applied Sciences.
// All rights reserved.
// SPDX-License-Identifier: MIT

#![no_std]
#![no_main]

#[cfg(feature = "log-rtt")]
use defmt_rtt as _;

#[cfg(feature = "log-serial")]
use defmt_serial as _;

use embassy_executor::Spawner;
use panic_probe as _;

mod battery;
mod bme680;
mod board;
mod iv;
mod lis3dh;
mod radio;

use core::cell::RefCell;

#[allow(unused_imports)]
use defmt::{dbg, debug, error, info, panic, warn};
use embassy_stm32::adc::Adc;
use embassy_stm32::exti::ExtiInput;
use embassy_stm32::gpio::{self, AnyPin, Pin};
use embassy_stm32::i2c::{self, I2c};
use embassy_stm32::{bind_interrupts, dma::NoDma, peripherals, spi::Spi, time};
use embassy_sync::channel::Channel;
use embassy_time::{Delay, Duration, Ticker};
use embedded_hal_bus::i2c::RefCellDevice;
use lora_phy::{
    mod_params::RadioError as PhyError,
    sx126x::{self, Stm32wl, Sx126x},
    LoRa,
};
use static_cell::StaticCell;

// for log-serial
#[allow(unused_imports)]
use embassy_stm32::usart::{self, Uart};

use lbt::{
    Dispatcher, MotionLine, MotionSource, NodeConfig, NodeId, RadioEventRouter, ReceiveMode,
    TimerSource, WakeSignal,
};
use node_api::*;

use crate::battery::BatteryAdc;
use crate::bme680::Bme680;
use crate::board::{NodeBoard, NodeSystem, UptimeClock};
use crate::lis3dh::Lis3dh;
use crate::radio::{LoraRadio, RadioCommands, RadioHandle};

const NODE_ID: NodeId = 102;
const WAKE_INTERVAL_MS: TimeMs = 3 * 1000;
const SEND_INTERVAL_MS: TimeMs = 900 * 1000;
const RESTART_INTERVAL_MS: TimeMs = 86_400_000;
const RECEIVE_MODE: ReceiveMode = ReceiveMode::DutyCycled;

const I2C_FREQUENCY: time::Hertz = time::Hertz(100_000);

type SubghzRadio = Sx126x<
    iv::SubghzSpiDevice<Spi<'static, peripherals::SUBGHZSPI, peripherals::DMA1_CH1, peripherals::DMA1_CH2>>,
    iv::Stm32wlInterfaceVariant<gpio::Output<'static, peripherals::PC5>>,
    Stm32wl,
>;
type I2cBus = I2c<'static, peripherals::I2C2>;

static WAKE: WakeSignal = WakeSignal::new();
static RADIO_EVENTS: RadioEventRouter<'static> = RadioEventRouter::new(&WAKE);
static MOTION: MotionSource<'static> = MotionSource::new(&WAKE);
static TIMER: TimerSource<'static> = TimerSource::new(&WAKE);
static RADIO_COMMANDS: RadioCommands = Channel::new();
static I2C_BUS: StaticCell<RefCell<I2cBus>> = StaticCell::new();

bind_interrupts!(struct Irqs{
    SUBGHZ_RADIO => iv::InterruptHandler;
    I2C2_EV => i2c::EventInterruptHandler<peripherals::I2C2>;
    I2C2_ER => i2c::ErrorInterruptHandler<peripherals::I2C2>;
    // for log-serial
    USART1 => usart::InterruptHandler<peripherals::USART1>;
});

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    let mut config = embassy_stm32::Config::default();
    {
        use embassy_stm32::rcc::*;
        config.rcc.hse = Some(Hse {
            freq: time::Hertz(32_000_000),
            mode: HseMode::Bypass,
            prescaler: HsePrescaler::DIV1,
        });
        config.rcc.mux = ClockSrc::PLL1_R;
        config.rcc.pll = Some(Pll {
            source: PllSource::HSE,
            prediv: PllPreDiv::DIV2,
            mul: PllMul::MUL6,
            divp: None,
            divq: None,
            divr: Some(PllRDiv::DIV2), // sysclk 48Mhz clock (32 / 2 * 6 / 2)
        });
    }
    let p = embassy_stm32::init(config);

    #[cfg(feature = "log-serial")]
    {
        let mut uart_config = usart::Config::default();
        uart_config.baudrate = 115200;
        static UART: StaticCell<Uart<'static, peripherals::USART1, peripherals::DMA2_CH1>> =
            StaticCell::new();
        let uart = UART
            .init(Uart::new(p.USART1, p.PB7, p.PB6, Irqs, p.DMA2_CH1, NoDma, uart_config).unwrap());
        defmt_serial::defmt_serial(uart);
    }

    let node_config = NodeConfig {
        node_id: NODE_ID,
        wake_interval_ms: WAKE_INTERVAL_MS,
        send_interval_ms: SEND_INTERVAL_MS,
        restart_interval_ms: RESTART_INTERVAL_MS,
        receive_mode: RECEIVE_MODE,
        ..Default::default()
    };
    info!("node {} ({})", NODE_ID, node_config.receive_mode.as_str());

    let led = gpio::Output::new(p.PB15, gpio::Level::Low, gpio::Speed::Low);

    // Nucleo rf switch
    let _rf_ctrl1 = gpio::Output::new(p.PC4, gpio::Level::High, gpio::Speed::High);
    let rf_ctrl2 = gpio::Output::new(p.PC5, gpio::Level::High, gpio::Speed::High);
    let _rf_ctrl3 = gpio::Output::new(p.PC3, gpio::Level::High, gpio::Speed::High);

    let lora_spi = Spi::new_subghz(p.SUBGHZSPI, p.DMA1_CH1, p.DMA1_CH2);
    let lora_spi = iv::SubghzSpiDevice(lora_spi);

    let radio_ready = match init_radio(lora_spi, rf_ctrl2, &node_config.modulation).await {
        Ok(radio) => spawner.spawn(radio_task(radio)).is_ok(),
        Err(err) => {
            error!("radio error = {}", err);
            false
        }
    };

    let i2c = I2c::new(
        p.I2C2,
        p.PA12,
        p.PA11,
        Irqs,
        NoDma,
        NoDma,
        I2C_FREQUENCY,
        Default::default(),
    );
    let i2c_bus: &'static RefCell<I2cBus> = I2C_BUS.init(RefCell::new(i2c));

    let int1 = ExtiInput::new(
        gpio::Input::new(p.PB8.degrade(), gpio::Pull::Down),
        p.EXTI8.degrade(),
    );
    let int2 = ExtiInput::new(
        gpio::Input::new(p.PA9.degrade(), gpio::Pull::Down),
        p.EXTI9.degrade(),
    );
    for spawned in [
        spawner.spawn(motion_task(int1, MotionLine::Int1)),
        spawner.spawn(motion_task(int2, MotionLine::Int2)),
        spawner.spawn(wake_timer_task(Duration::from_millis(node_config.wake_interval_ms))),
    ] {
        if spawned.is_err() {
            error!("could not spawn wake source task");
        }
    }

    let board = NodeBoard {
        radio: RadioHandle::new(&RADIO_COMMANDS, radio_ready),
        sensor: Bme680::new(RefCellDevice::new(i2c_bus)),
        accelerometer: Lis3dh::new(RefCellDevice::new(i2c_bus)),
        battery: BatteryAdc::new(Adc::new(p.ADC, &mut Delay), p.PB3),
        clock: UptimeClock,
        system: NodeSystem::new(led),
    };

    match Dispatcher::new(board, node_config, &WAKE, &RADIO_EVENTS, &MOTION) {
        Ok(dispatcher) => dispatcher.run().await,
        Err(err) => panic!("invalid node configuration: {}", err),
    }
}

async fn init_radio(
    spi: iv::SubghzSpiDevice<Spi<'static, peripherals::SUBGHZSPI, peripherals::DMA1_CH1, peripherals::DMA1_CH2>>,
    rf_switch_tx: gpio::Output<'static, peripherals::PC5>,
    modulation: &LoraModulation,
) -> Result<LoraRadio<SubghzRadio, Delay>, PhyError> {
    let config = sx126x::Config {
        chip: Stm32wl {
            use_high_power_pa: true,
        },
        tcxo_ctrl: Some(sx126x::TcxoCtrlVoltage::Ctrl1V7),
        use_dcdc: true,
        rx_boost: false,
    };
    let iv = iv::Stm32wlInterfaceVariant::new(Irqs, None, Some(rf_switch_tx))?;
    let lora = LoRa::new(Sx126x::new(spi, iv, config), false, Delay).await?;
    LoraRadio::new(lora, modulation)
}

#[embassy_executor::task]
async fn radio_task(mut radio: LoraRadio<SubghzRadio, Delay>) -> ! {
    radio.run(&RADIO_COMMANDS, &RADIO_EVENTS).await
}

#[embassy_executor::task]
async fn wake_timer_task(period: Duration) -> ! {
    let mut ticker = Ticker::every(period);
    loop {
        ticker.next().await;
        TIMER.on_expired();
    }
}

#[embassy_executor::task(pool_size = 2)]
async fn motion_task(mut line: ExtiInput<'static, AnyPin>, source: MotionLine) -> ! {
    loop {
        line.wait_for_rising_edge().await;
        if !MOTION.on_interrupt(source) {
            debug!("motion line {} ignored while disarmed", source);
        }
    }
}

// prevent panic messages from being printed twice when `defmt::panic` is invoked
#[defmt::panic_handler]
fn panic() -> ! {
    cortex_m::asm::udf()
}
